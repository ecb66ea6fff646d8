//! Inference client for the local model backend (Ollama).
//!
//! Provides:
//! - `ModelClient`, the seam the Conductor streams through
//! - `OllamaClient`, the `/api/chat` + `/api/show` implementation
//! - NDJSON stream parsing that tolerates lines split across network chunks

pub mod client;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{ModelClient, OllamaClient};
pub use errors::InferenceError;
pub use types::{ChatDelta, ChatMessage, Role, SimpleChatRequest, ToolCall};
