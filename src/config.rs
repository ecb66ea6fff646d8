//! Application configuration loading and validation.
//!
//! Reads `localchat.yaml` and resolves environment variables. Every section
//! and field has a default, so a missing file or a partial file both work.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::mcp_client::ServerDescriptor;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "localchat.yaml";

/// Env var that points at a config file.
pub const CONFIG_ENV_VAR: &str = "LOCALCHAT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `localchat.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub conductor: ConductorSettings,
    pub tools: ToolsConfig,
}

/// Model backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub name: String,
    pub temperature: Option<f32>,
    pub num_ctx: Option<u32>,
    /// Total timeout for one streamed chat request.
    ///
    /// Local models can take a long time to process a large context before
    /// emitting the first token.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            name: "qwen3:8b".to_string(),
            temperature: None,
            num_ctx: None,
            request_timeout_secs: 180,
        }
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConductorSettings {
    /// Upper bound on model round-trips per answer.
    pub max_phases: usize,
    /// Overrides the built-in system prompt.
    pub system_prompt: Option<String>,
    /// Run independent tool calls within one delta concurrently.
    pub parallel_tool_calls: bool,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            max_phases: 10,
            system_prompt: None,
            parallel_tool_calls: false,
        }
    }
}

/// Tool server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub call_timeout_ms: u64,
    pub init_timeout_secs: u64,
    pub servers: Vec<ServerDescriptor>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            init_timeout_secs: 30,
            servers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Reject values that would make the loop or timeouts meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conductor.max_phases == 0 {
            return Err(ConfigError::Invalid {
                reason: "conductor.max_phases must be at least 1".into(),
            });
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "model.name must not be empty".into(),
            });
        }
        if self.tools.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "tools.call_timeout_ms must be positive".into(),
            });
        }
        for server in &self.tools.servers {
            if server.command.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("tool server '{}' has an empty command", server.server_id()),
                });
            }
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: `explicit`, then `LOCALCHAT_CONFIG`, then an upward search from
/// `start` for `localchat.yaml`, then `<data_dir>/localchat.yaml`.
pub fn find_config_path(explicit: Option<&Path>, start: &Path) -> Option<PathBuf> {
    // 1. Explicit path always wins, even if missing (load reports it)
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // 2. Env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(expand_tilde(&path)));
        }
    }

    // 3. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 4. Per-user data dir
    let candidate = crate::data_dir().join(CONFIG_FILE_NAME);
    candidate.exists().then_some(candidate)
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let config = parse_config(&raw).map_err(|e| match e {
        ConfigError::ParseFailed { reason, .. } => ConfigError::ParseFailed {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    })?;

    tracing::info!(path = %path.display(), servers = config.tools.servers.len(), "config loaded");
    Ok(config)
}

/// Parse YAML text into a validated config.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    // An empty file deserializes to unit, not a mapping
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    let config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

/// Find and load the config, falling back to defaults when none exists.
pub fn load_or_default(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match find_config_path(explicit, &cwd) {
        Some(path) => load_config(&path),
        None => {
            tracing::info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        let result = interpolate_env_vars("url: ${LOCALCHAT_TEST_UNSET_VAR_XYZ:-http://x:1}");
        assert_eq!(result, "url: http://x:1");
    }

    #[test]
    fn test_interpolate_env_vars_set() {
        std::env::set_var("LOCALCHAT_TEST_MODEL_NAME", "llama3.1");
        let result = interpolate_env_vars("name: ${LOCALCHAT_TEST_MODEL_NAME}");
        assert_eq!(result, "name: llama3.1");
    }

    #[test]
    fn test_interpolate_unset_without_default_is_empty() {
        assert_eq!(interpolate_env_vars("a${LOCALCHAT_TEST_NOPE_123}b"), "ab");
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/servers");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/servers"));
        assert_eq!(expand_tilde("/abs"), "/abs");
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = parse_config("").unwrap();
        assert_eq!(config.conductor.max_phases, 10);
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert!(config.tools.servers.is_empty());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let yaml = r#"
model:
  name: "llama3.1:8b"
tools:
  servers:
    - command: python
      script_path: ./servers/search.py
      additional_args: ["--fast"]
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.model.name, "llama3.1:8b");
        assert_eq!(config.model.request_timeout_secs, 180);
        assert_eq!(config.tools.call_timeout_ms, 30_000);
        assert_eq!(config.tools.servers.len(), 1);
        assert_eq!(config.tools.servers[0].server_id(), "search");
        assert_eq!(config.tools.servers[0].additional_args, vec!["--fast"]);
    }

    #[test]
    fn test_zero_max_phases_is_invalid() {
        let err = parse_config("conductor:\n  max_phases: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = parse_config("model: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "conductor:\n  max_phases: 3\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.conductor.max_phases, 3);

        let missing = dir.path().join("nope.yaml");
        match load_config(&missing).unwrap_err() {
            ConfigError::ReadFailed { path, .. } => assert_eq!(path, missing),
            other => panic!("expected ReadFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_find_config_path_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "").unwrap();

        // Explicit path wins over everything else
        let explicit = dir.path().join("other.yaml");
        assert_eq!(find_config_path(Some(&explicit), &nested), Some(explicit));

        if std::env::var(CONFIG_ENV_VAR).is_err() {
            assert_eq!(find_config_path(None, &nested), Some(config_path));
        }
    }
}
