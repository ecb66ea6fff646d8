//! Tool-server client: JSON-RPC over stdio to external tool servers.
//!
//! This module handles:
//! - Spawning tool-server child processes and the MCP handshake
//! - JSON-RPC 2.0 communication over process stdio
//! - Tool discovery and aggregation across all servers
//! - Tool call dispatch and graceful shutdown
//!
//! The Conductor resolves model-requested tool calls against the
//! `ToolRegistry` built here.

pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use lifecycle::StdioConnector;
pub use registry::{ConnectFailure, ToolEntry, ToolRegistry};
pub use session::{ServerConnector, ToolServer};
pub use types::{ServerDescriptor, ToolCallResponse, ToolContent, ToolDescriptor};
