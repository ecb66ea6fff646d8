//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Failures inside one Conductor phase.
///
/// None of these escape the Conductor: each becomes a single terminal
/// `Error in conductor mode: <message>` chunk.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The model chat call failed (transport, HTTP status, malformed stream).
    #[error(transparent)]
    Model(#[from] InferenceError),

    /// The model stream closed without sending anything.
    #[error("model stream ended without a response")]
    EmptyResponse,
}
