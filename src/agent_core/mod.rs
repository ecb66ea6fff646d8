//! Agent Core: orchestration layer for LocalChat.
//!
//! Submodules:
//! - `conductor`: Multi-phase tool-calling loop that produces one answer
//! - `cancellation`: Cooperative cancellation shared with the caller
//! - `content_splitter`: Separates answer text from `<think>` reasoning
//! - `events`: Execution markers embedded in the output stream
//! - `conversation`: Ordered user/assistant transcript
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod cancellation;
pub mod conductor;
pub mod content_splitter;
pub mod conversation;
pub mod errors;
pub mod events;
pub mod types;

// Re-exports for convenience
pub use cancellation::{AbortSignal, CancellationToken};
pub use conductor::{Conductor, ConductorConfig};
pub use content_splitter::ContentSplitter;
pub use conversation::ConversationTranscript;
pub use errors::ConductorError;
pub use events::{
    emit_execution_event, parse_stream, strip_markers, EventKind, EventStatus, ExecutionEvent,
    StreamMarker, StreamSegment,
};
pub use types::{ConversationMessage, ToolOutcome};
