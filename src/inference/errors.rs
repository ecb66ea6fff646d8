//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// NDJSON stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// The backend reported an error inside the stream (`{"error": ...}`).
    #[error("model error: {message}")]
    ModelError {
        message: String,
    },

    /// The model configuration cannot be used (bad endpoint URL).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Map a `reqwest` failure onto the matching variant.
    pub fn from_reqwest(endpoint: &str, timeout_secs: u64, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
