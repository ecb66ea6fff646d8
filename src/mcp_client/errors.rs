//! Tool-server error types.

use thiserror::Error;

/// Errors that can occur while connecting to or calling a tool server.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        tool: String,
        timeout_ms: u64,
    },

    /// The server closed its stdout or the reader task stopped.
    #[error("connection to server '{server}' closed")]
    ConnectionClosed {
        server: String,
    },

    /// Configuration error (bad descriptor, missing script).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}
