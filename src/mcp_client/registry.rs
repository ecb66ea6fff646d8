//! Tool registry: owns tool-server sessions and the merged tool cache.
//!
//! Provides:
//! - Connecting to every configured server, tolerating partial failure
//! - Tool discovery and aggregation across all live sessions
//! - Exact, case-sensitive tool lookup by name
//! - Serialization of tools into the model's function-calling format

use std::collections::HashMap;
use std::sync::Arc;

use super::errors::McpError;
use super::lifecycle::StdioConnector;
use super::session::{ServerConnector, ToolServer};
use super::types::{ServerDescriptor, ToolCallResponse, ToolDescriptor};

/// Cache entry kind for tools that live in an external server process.
pub const EXTERNAL_TOOL: &str = "external";

// ─── ToolEntry ───────────────────────────────────────────────────────────────

/// One callable tool, bound to the session that exports it.
#[derive(Clone)]
pub struct ToolEntry {
    pub server_id: String,
    pub kind: &'static str,
    pub descriptor: ToolDescriptor,
    server: Arc<dyn ToolServer>,
}

impl ToolEntry {
    /// Dispatch a call to the server that owns this tool.
    pub async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolCallResponse, McpError> {
        self.server.call_tool(&self.descriptor.name, arguments).await
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("server_id", &self.server_id)
            .field("kind", &self.kind)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// A server that could not be connected.
#[derive(Debug)]
pub struct ConnectFailure {
    pub server_id: String,
    pub error: McpError,
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Connections to tool servers plus the flat cache of callable tools.
///
/// Connection and discovery happen once at startup through `&mut self`;
/// afterwards the registry is shared read-only (usually behind an `Arc`)
/// and `ToolEntry::invoke` may be called concurrently.
pub struct ToolRegistry {
    connector: Arc<dyn ServerConnector>,
    sessions: Vec<Arc<dyn ToolServer>>,
    /// Tools in registration order.
    entries: Vec<ToolEntry>,
    /// `tool name → index into entries`.
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry that opens sessions through `connector`.
    pub fn new(connector: Arc<dyn ServerConnector>) -> Self {
        Self {
            connector,
            sessions: Vec::new(),
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Registry that spawns stdio server processes.
    pub fn with_stdio(connector: StdioConnector) -> Self {
        Self::new(Arc::new(connector))
    }

    /// Registry with no connector and no tools.
    pub fn empty() -> Self {
        Self::with_stdio(StdioConnector::default())
    }

    /// Connect to every descriptor in order.
    ///
    /// A failure on one server is logged and skipped; the remaining servers
    /// are still attempted. Returns the failures.
    pub async fn connect(&mut self, descriptors: &[ServerDescriptor]) -> Vec<ConnectFailure> {
        let mut failures = Vec::new();

        for descriptor in descriptors {
            let server_id = descriptor.server_id();
            match self.connector.connect(&server_id, descriptor).await {
                Ok(session) => {
                    tracing::info!(server = %server_id, "tool server connected");
                    self.sessions.push(session);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server_id,
                        error = %e,
                        "tool server failed to connect, continuing without it"
                    );
                    failures.push(ConnectFailure {
                        server_id,
                        error: e,
                    });
                }
            }
        }

        if !descriptors.is_empty() && self.sessions.is_empty() {
            tracing::warn!("no tool servers connected, tools are unavailable");
        }

        failures
    }

    /// Query every live session for its tools and rebuild the cache.
    ///
    /// A session whose `tools/list` fails contributes nothing. When two
    /// servers export the same name, the later one wins.
    pub async fn discover_tools(&mut self) -> usize {
        self.entries.clear();
        self.by_name.clear();

        for session in &self.sessions {
            let server_id = session.server_id().to_string();
            let tools = match session.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(server = %server_id, error = %e, "tool discovery failed");
                    continue;
                }
            };

            tracing::info!(server = %server_id, count = tools.len(), "discovered tools");

            for tool in tools {
                let entry = ToolEntry {
                    server_id: server_id.clone(),
                    kind: EXTERNAL_TOOL,
                    descriptor: ToolDescriptor::from_mcp(&server_id, tool),
                    server: Arc::clone(session),
                };
                let name = entry.descriptor.name.clone();

                match self.by_name.get(&name) {
                    Some(&idx) => {
                        tracing::warn!(
                            tool = %name,
                            previous = %self.entries[idx].server_id,
                            replacement = %server_id,
                            "duplicate tool name, last registered wins"
                        );
                        self.entries[idx] = entry;
                    }
                    None => {
                        self.by_name.insert(name, self.entries.len());
                        self.entries.push(entry);
                    }
                }
            }
        }

        self.entries.len()
    }

    /// Look up a tool by exact, case-sensitive name.
    pub fn resolve(&self, name: &str) -> Option<&ToolEntry> {
        self.by_name.get(name).map(|&idx| &self.entries[idx])
    }

    /// Serialize all tools in the function-calling format Ollama accepts.
    pub fn to_model_tools(&self) -> Vec<serde_json::Value> {
        self.entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": e.descriptor.name,
                        "description": e.descriptor.description,
                        "parameters": e.descriptor.json_schema,
                    }
                })
            })
            .collect()
    }

    /// Number of connected servers.
    pub fn server_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of cached tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close every session. Errors are logged and do not stop the others.
    pub async fn shutdown(&self) {
        for session in &self.sessions {
            if let Err(e) = session.shutdown().await {
                tracing::warn!(server = %session.server_id(), error = %e, "shutdown failed");
            } else {
                tracing::debug!(server = %session.server_id(), "tool server stopped");
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("servers", &self.sessions.len())
            .field("tools", &self.entries)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
