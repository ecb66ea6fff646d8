//! Shared types for the inference client.
//!
//! These mirror the Ollama `/api/chat` types, used for both request building
//! and response parsing.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Messages ────────────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Capitalized label used when rendering a transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        }
    }
}

/// A single message in the conversation sent to the model.
///
/// `tool_calls` and `tool_name` are skipped when empty so plain messages
/// serialize as `{role, content}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Assistant messages may carry the calls they requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool results name the tool they answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// A tool message. `tool_name` is `None` for synthetic context such as
    /// user memories.
    pub fn tool(tool_name: Option<&str>, content: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.map(str::to_string),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }
}

/// Function name and arguments of a tool call.
///
/// Ollama sends `arguments` as a JSON object, not a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Sampling options forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

impl ModelOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_ctx.is_none()
    }
}

/// `POST /api/chat` request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "ModelOptions::is_empty")]
    pub options: ModelOptions,
}

/// Input to the tool-less answer path.
#[derive(Debug, Clone, Default)]
pub struct SimpleChatRequest {
    pub system_prompt: String,
    pub memories: String,
    /// The transcript replayed as context.
    pub messages: Vec<ChatMessage>,
}

impl SimpleChatRequest {
    /// System prompt, memories (when present), then the transcript.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        if !self.memories.is_empty() {
            messages.push(ChatMessage::system(format!(
                "User Memories: {}",
                self.memories
            )));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }
}

// ─── Streaming ───────────────────────────────────────────────────────────────

/// One incremental delta of a streamed chat response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatDelta {
    pub content: String,
    /// Native reasoning text, for backends that report it separately.
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
}

impl ChatDelta {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Self::default()
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }
}

/// Wire shape of one NDJSON line from `/api/chat`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl From<ChatChunk> for ChatDelta {
    fn from(chunk: ChatChunk) -> Self {
        let message = chunk.message;
        Self {
            content: message
                .as_ref()
                .and_then(|m| m.content.clone())
                .unwrap_or_default(),
            thinking: message
                .as_ref()
                .and_then(|m| m.thinking.clone())
                .filter(|t| !t.is_empty()),
            tool_calls: message.and_then(|m| m.tool_calls).unwrap_or_default(),
            done: chunk.done,
        }
    }
}

/// `POST /api/show` response, only the fields we read.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShowResponse {
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub template: Option<String>,
}

/// Stream of chat deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, InferenceError>> + Send>>;

/// Stream of plain answer chunks.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

// ─── Tests ───────────────────────────────────────────────────────────────────
