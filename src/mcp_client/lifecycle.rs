//! Server process lifecycle management.
//!
//! Handles spawning tool-server child processes, the MCP initialization
//! handshake, and shutdown. Each server runs as a separate OS process
//! communicating via JSON-RPC over stdio.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::session::{ServerConnector, ToolServer};
use super::transport::{extract_result, StdioTransport};
use super::types::{
    InitializeResult, ListToolsResult, McpTool, ServerDescriptor, ToolCallResponse,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for the initialize handshake.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for tool call execution (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Timeout for graceful exit before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of trailing stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

// ─── ManagedServer ───────────────────────────────────────────────────────────

/// A running tool-server process with its transport.
pub struct ManagedServer {
    server_id: String,
    process: Mutex<Child>,
    transport: StdioTransport,
    call_timeout_ms: u64,
}

#[async_trait]
impl ToolServer for ManagedServer {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let response = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            self.transport.request("tools/list", Some(serde_json::json!({}))),
        )
        .await
        .map_err(|_| McpError::Timeout {
            tool: "tools/list".to_string(),
            timeout_ms: self.call_timeout_ms,
        })??;
        let result = extract_result(response)?;
        let list: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.server_id.clone(),
                reason: format!("failed to parse tools/list result: {e}"),
            })?;
        Ok(list.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResponse, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let response = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            self.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| McpError::Timeout {
            tool: name.to_string(),
            timeout_ms: self.call_timeout_ms,
        })??;

        let result = extract_result(response)?;
        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.server_id.clone(),
            reason: format!("failed to parse tools/call result: {e}"),
        })
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        self.transport.close().await;
        let mut process = self.process.lock().await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, process.wait()).await {
            Ok(Ok(_)) => Ok(()),
            _ => {
                // Force kill if the process did not exit on its own
                process.kill().await.map_err(|e| McpError::TransportError {
                    server: self.server_id.clone(),
                    reason: format!("failed to kill server process: {e}"),
                })
            }
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a single tool server and perform the initialization handshake.
pub async fn spawn_server(
    server_id: &str,
    descriptor: &ServerDescriptor,
    init_timeout: Duration,
    call_timeout_ms: u64,
) -> Result<ManagedServer, McpError> {
    if descriptor.command.trim().is_empty() {
        return Err(McpError::ConfigError {
            reason: format!("server '{server_id}' has an empty command"),
        });
    }

    let mut cmd = Command::new(&descriptor.command);
    cmd.args(descriptor.args());

    for (key, value) in &descriptor.env {
        cmd.env(key, value);
    }
    if let Some(dir) = descriptor.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: server_id.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: server_id.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: server_id.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr_tail = Arc::new(StdMutex::new(VecDeque::new()));
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(
            server_id.to_string(),
            stderr,
            Arc::clone(&stderr_tail),
        ));
    }

    let transport = StdioTransport::new(server_id, stdin, stdout);

    match tokio::time::timeout(init_timeout, initialize(&transport, server_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(McpError::InitFailed {
                name: server_id.to_string(),
                reason: format!("{e}{}", format_stderr_suffix(&join_tail(&stderr_tail))),
            });
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(McpError::InitFailed {
                name: server_id.to_string(),
                reason: format!(
                    "initialization timed out after {}s{}",
                    init_timeout.as_secs(),
                    format_stderr_suffix(&join_tail(&stderr_tail))
                ),
            });
        }
    }

    Ok(ManagedServer {
        server_id: server_id.to_string(),
        process: Mutex::new(child),
        transport,
        call_timeout_ms,
    })
}

/// Perform the MCP initialization handshake.
async fn initialize(transport: &StdioTransport, server_id: &str) -> Result<(), McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_id.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    let server_name = init.server_info.as_ref().and_then(|i| i.name.clone());
    tracing::info!(
        server = server_id,
        server_name = server_name.as_deref().unwrap_or("unknown"),
        protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
        "tool server initialized"
    );

    transport.notify("notifications/initialized", None).await
}

/// Forward server stderr into debug logs, keeping a short tail for errors.
async fn drain_stderr(
    server_id: String,
    stderr: ChildStderr,
    tail: Arc<StdMutex<VecDeque<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server_id, stderr = %line, "server stderr");
        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

fn join_tail(tail: &StdMutex<VecDeque<String>>) -> String {
    let tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
    tail.iter().cloned().collect::<Vec<_>>().join("\n")
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Connector ───────────────────────────────────────────────────────────────

/// Connects descriptors by spawning child processes.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    pub init_timeout: Duration,
    pub call_timeout_ms: u64,
}

impl Default for StdioConnector {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

#[async_trait]
impl ServerConnector for StdioConnector {
    async fn connect(
        &self,
        server_id: &str,
        descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn ToolServer>, McpError> {
        let server =
            spawn_server(server_id, descriptor, self.init_timeout, self.call_timeout_ms).await?;
        Ok(Arc::new(server))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::ToolRegistry;

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix("  "), "");
        assert_eq!(
            format_stderr_suffix("ImportError: no module\n"),
            " | stderr: ImportError: no module"
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let desc = ServerDescriptor::new("__localchat_no_such_binary__", "server.py");
        let err = spawn_server("missing", &desc, Duration::from_secs(1), 1000)
            .await
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, McpError::SpawnFailed { ref name, .. } if name == "missing"));
    }

    #[tokio::test]
    async fn test_empty_command_is_config_error() {
        let desc = ServerDescriptor::new("  ", "server.py");
        let err = spawn_server("blank", &desc, Duration::from_secs(1), 1000)
            .await
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, McpError::ConfigError { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_exiting_during_handshake_is_init_failure() {
        // `sh <script>` where the script prints to stderr and exits at once.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken.sh");
        std::fs::write(&script, "echo 'boom' >&2\nexit 1\n").unwrap();

        let desc = ServerDescriptor::new("sh", script.to_str().unwrap());
        let err = spawn_server("broken", &desc, Duration::from_secs(5), 1000)
            .await
            .err()
            .expect("handshake should fail");
        assert!(matches!(err, McpError::InitFailed { ref name, .. } if name == "broken"));
    }

    /// Answers `initialize`, swallows the `initialized` notification and the
    /// `tools/list` request, then never replies again.
    #[cfg(unix)]
    fn stalled_listing_script(dir: &std::path::Path) -> std::path::PathBuf {
        let script = dir.join("stalled.sh");
        std::fs::write(
            &script,
            r#"read line
id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n' "$id"
read line
read line
exec sleep 30
"#,
        )
        .unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unanswered_tool_listing_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = stalled_listing_script(dir.path());
        let desc = ServerDescriptor::new("sh", script.to_str().unwrap());

        let server = spawn_server("stalled", &desc, Duration::from_secs(5), 300)
            .await
            .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), server.list_tools())
            .await
            .expect("tools/list should be bounded by the call timeout")
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::Timeout { ref tool, timeout_ms: 300 } if tool == "tools/list"
        ));
        server.shutdown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_server_does_not_block_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let script = stalled_listing_script(dir.path());
        let mut desc = ServerDescriptor::new("sh", script.to_str().unwrap());
        desc.name = Some("stalled".into());

        let mut registry = ToolRegistry::with_stdio(StdioConnector {
            init_timeout: Duration::from_secs(5),
            call_timeout_ms: 300,
        });
        assert!(registry.connect(&[desc]).await.is_empty());
        assert_eq!(registry.server_count(), 1);

        let found = tokio::time::timeout(Duration::from_secs(5), registry.discover_tools())
            .await
            .expect("discovery should finish despite a stalled server");
        assert_eq!(found, 0);
        assert!(registry.is_empty());
        registry.shutdown().await;
    }
}
