//! Shared types across the agent core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::types::{ChatMessage, Role};

// ─── Conversation ────────────────────────────────────────────────────────────

/// A message in the canonical user/assistant history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    /// The wire message sent to the model.
    pub fn to_model_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

// ─── Tool Outcomes ───────────────────────────────────────────────────────────

/// The result of one tool invocation within a phase.
///
/// Feeds both the UI (as an execution event) and the model (as a tool
/// message).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    pub is_error: bool,
    pub duration_ms: u64,
}

impl ToolOutcome {
    /// Tool message appended to the working list for the next phase.
    pub fn to_tool_message(&self) -> ChatMessage {
        ChatMessage::tool(Some(&self.name), self.result.clone())
    }
}
