//! Session seams between the registry and concrete tool servers.
//!
//! The registry only talks to `ToolServer` / `ServerConnector` trait objects,
//! so tests can substitute in-process fakes for spawned processes.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::McpError;
use super::types::{McpTool, ServerDescriptor, ToolCallResponse};

/// An open session with one tool server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Registry id of this server.
    fn server_id(&self) -> &str;

    /// Query the server's tool list (`tools/list`).
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError>;

    /// Invoke one tool (`tools/call`).
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResponse, McpError>;

    /// Close the session. Best-effort; errors are logged by the caller.
    async fn shutdown(&self) -> Result<(), McpError> {
        Ok(())
    }
}

/// Opens sessions from descriptors.
#[async_trait]
pub trait ServerConnector: Send + Sync {
    async fn connect(
        &self,
        server_id: &str,
        descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn ToolServer>, McpError>;
}
