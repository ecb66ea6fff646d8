//! Shared types for the tool-server client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// MCP protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Any message read from a server's stdout.
///
/// Responses carry an `id` plus `result` or `error`. Server-initiated
/// notifications carry a `method` and no `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// How to launch one tool server.
///
/// The process is started as `command script_path additional_args...`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerDescriptor {
    /// Registry id for this server. Defaults to the script's file stem.
    #[serde(default)]
    pub name: Option<String>,
    pub command: String,
    #[serde(alias = "scriptPath")]
    pub script_path: String,
    #[serde(default, alias = "additionalArgs")]
    pub additional_args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the server process.
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ServerDescriptor {
    /// Build a descriptor with no extra arguments.
    pub fn new(command: &str, script_path: &str) -> Self {
        Self {
            name: None,
            command: command.to_string(),
            script_path: script_path.to_string(),
            additional_args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// The id this server is registered under.
    pub fn server_id(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        Path::new(&self.script_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.command)
            .to_string()
    }

    /// Full argument vector passed to `command`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.additional_args.len() + 1);
        args.push(self.script_path.clone());
        args.extend(self.additional_args.iter().cloned());
        args
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// Tool entry as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpTool>,
}

/// A discovered tool, tagged with the server that exports it.
///
/// Immutable after discovery.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDescriptor {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub json_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn from_mcp(server_id: &str, tool: McpTool) -> Self {
        Self {
            server_id: server_id.to_string(),
            name: tool.name,
            description: tool.description,
            json_schema: tool.input_schema,
        }
    }
}

/// One content item in a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ToolContent {
    pub fn text(text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.to_string()),
        }
    }
}

/// `tools/call` result payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResponse {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError", alias = "is_error")]
    pub is_error: bool,
}

impl ToolCallResponse {
    /// Successful single-text response.
    pub fn ok_text(text: &str) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    /// Join all text items, one per line. Non-text items are summarised by type.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match &item.text {
                Some(text) => text.clone(),
                None => format!("[{} content]", item.kind),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_omits_missing_params() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&note).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_response_error_deserialization() {
        let json = r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, Some(2));
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_server_notification_parses_without_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.id.is_none());
        assert_eq!(resp.method.as_deref(), Some("notifications/tools/list_changed"));
    }

    #[test]
    fn test_server_id_defaults_to_script_stem() {
        let desc = ServerDescriptor::new("python3", "/opt/servers/web_search.py");
        assert_eq!(desc.server_id(), "web_search");

        let mut named = desc.clone();
        named.name = Some("search".into());
        assert_eq!(named.server_id(), "search");
    }

    #[test]
    fn test_descriptor_args_put_script_first() {
        let mut desc = ServerDescriptor::new("node", "server.js");
        desc.additional_args = vec!["--verbose".into()];
        assert_eq!(desc.args(), vec!["server.js", "--verbose"]);
    }

    #[test]
    fn test_descriptor_accepts_camel_case_keys() {
        let json = r#"{"command":"node","scriptPath":"a.js","additionalArgs":["-x"]}"#;
        let desc: ServerDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.script_path, "a.js");
        assert_eq!(desc.additional_args, vec!["-x"]);
    }

    #[test]
    fn test_tool_call_response_joined_text() {
        let json = r#"{"content":[{"type":"text","text":"a"},{"type":"image"},{"type":"text","text":"b"}],"isError":false}"#;
        let resp: ToolCallResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.joined_text(), "a\n[image content]\nb");
        assert!(!resp.is_error);
    }

    #[test]
    fn test_mcp_tool_reads_input_schema() {
        let json = r#"{"name":"search","description":"Web search","inputSchema":{"type":"object"}}"#;
        let tool: McpTool = serde_json::from_str(json).unwrap();
        let desc = ToolDescriptor::from_mcp("web", tool);
        assert_eq!(desc.server_id, "web");
        assert_eq!(desc.json_schema["type"], "object");
    }
}
