//! ConversationTranscript: the ordered user/assistant log of a chat session.
//!
//! Responsibilities:
//! - Append user and assistant messages in call order
//! - Hand out copies of the history that callers may mutate freely
//! - Build `Vec<ChatMessage>` for the inference client
//!
//! The transcript holds plain text only. Callers must strip execution
//! markers from an answer (see `events::strip_markers`) before recording it.

use std::fmt;

use crate::inference::types::{ChatMessage, Role};

use super::types::ConversationMessage;

/// Canonical message history across turns.
#[derive(Debug, Clone, Default)]
pub struct ConversationTranscript {
    messages: Vec<ConversationMessage>,
}

impl ConversationTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user_message(&mut self, text: &str) {
        self.messages.push(ConversationMessage::new(Role::User, text));
    }

    pub fn add_assistant_message(&mut self, text: &str) {
        self.messages
            .push(ConversationMessage::new(Role::Assistant, text));
    }

    /// A copy of the history. Mutating it does not affect the transcript.
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.messages.clone()
    }

    /// Map 1:1 onto the wire role/content pairs.
    pub fn to_model_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(ConversationMessage::to_model_message)
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Renders one `Label: text` line per message.
impl fmt::Display for ConversationTranscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, msg) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", msg.role.label(), msg.content)?;
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
