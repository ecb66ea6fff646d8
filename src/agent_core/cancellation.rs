//! Cooperative cancellation for one user-initiated answer.
//!
//! A `CancellationToken` is a cheap cloneable handle. Every clone observes
//! the same state, so the caller keeps one clone (to cancel from a Ctrl-C
//! handler or a UI "stop" button) while the Conductor polls another at each
//! suspension point.
//!
//! The token can also own one abort signal at a time. The Conductor attaches
//! a fresh signal around each in-flight model request or tool call; tripping
//! the token aborts that operation instead of waiting for it to finish.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Abort signal attached to a single in-flight operation.
pub use tokio_util::sync::CancellationToken as AbortSignal;

#[derive(Debug, Default)]
struct Inner {
    cancelled: bool,
    reason: Option<String>,
    abort: Option<AbortSignal>,
}

/// Shared cancellation state for one answer turn.
///
/// `cancel` records the first reason only; calling it again while already
/// cancelled changes nothing. `reset` is the only way to re-arm the token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Mutex<Inner>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trip the token and abort the attached operation, if any.
    pub fn cancel(&self, reason: Option<&str>) {
        let mut inner = self.lock();
        if inner.cancelled {
            return;
        }
        inner.cancelled = true;
        inner.reason = reason.map(str::to_string);
        if let Some(signal) = inner.abort.take() {
            signal.cancel();
        }
        tracing::info!(reason = reason.unwrap_or("none"), "cancellation requested");
    }

    /// Clear the cancelled flag, the reason, and any attached signal.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.cancelled = false;
        inner.reason = None;
        inner.abort = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Attach the signal for the current in-flight operation, replacing any
    /// previous one. If the token is already cancelled the signal is aborted
    /// immediately.
    pub fn set_abort_controller(&self, signal: AbortSignal) {
        let mut inner = self.lock();
        if inner.cancelled {
            signal.cancel();
            return;
        }
        inner.abort = Some(signal);
    }

    /// Detach the current signal without aborting it.
    pub fn clear_abort_controller(&self) {
        self.lock().abort = None;
    }

    /// Run `fut` with a freshly attached abort signal.
    ///
    /// Returns `None` if the token is tripped before `fut` completes; `fut`
    /// is dropped at that point.
    pub async fn abortable<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        let signal = AbortSignal::new();
        self.set_abort_controller(signal.clone());

        let output = tokio::select! {
            biased;
            _ = signal.cancelled() => None,
            out = fut => Some(out),
        };

        if output.is_some() {
            self.clear_abort_controller();
        }
        output
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
