//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with tool-server child processes:
//! - Writing line-delimited JSON-RPC requests to stdin
//! - A background reader task that routes responses to their callers by `id`
//! - Skipping non-JSON stdout lines (server log output)
//!
//! Requests may be issued concurrently from several turns; each caller waits
//! on its own response channel, so responses are never consumed by the wrong
//! request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<Option<BoxedWriter>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Create a transport from any writer/reader pair (child stdin/stdout in
    /// production, an in-memory duplex in tests) and start the reader task.
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            server_name.to_string(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            alive,
            reader_task,
        }
    }

    /// Whether the reader task is still receiving from the server.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Dropping the returned future (e.g. on cancellation) removes the
    /// pending entry; a late response is then discarded by the reader.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        if !self.is_alive() {
            return Err(McpError::ConnectionClosed {
                server: self.server_name.clone(),
            });
        }

        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut json = serde_json::to_string(&req).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        json.push('\n');

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.write_line(&json).await?;

        rx.await.map_err(|_| McpError::ConnectionClosed {
            server: self.server_name.clone(),
        })
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);

        let mut json = serde_json::to_string(&notification).map_err(|e| {
            McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize notification: {e}"),
            }
        })?;
        json.push('\n');

        self.write_line(&json).await
    }

    /// Close the server's stdin. Stdio servers exit once their input ends.
    pub async fn close(&self) {
        self.writer.lock().await.take();
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| McpError::ConnectionClosed {
            server: self.server_name.clone(),
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Removes a request's pending entry when its caller finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read stdout lines until EOF, dispatching responses by id.
async fn read_loop<R>(server_name: String, reader: R, pending: PendingMap, alive: Arc<AtomicBool>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                    Ok(resp) => match resp.id {
                        Some(id) => {
                            let waiter = lock_pending(&pending).remove(&id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(resp);
                                }
                                None => tracing::debug!(
                                    server = %server_name,
                                    id,
                                    "discarding response with no waiting caller"
                                ),
                            }
                        }
                        None => tracing::debug!(
                            server = %server_name,
                            method = resp.method.as_deref().unwrap_or(""),
                            "server notification"
                        ),
                    },
                    // Not JSON-RPC: server log output on stdout.
                    Err(_) => tracing::trace!(server = %server_name, line = trimmed, "skipping non-JSON line"),
                }
            }
            Ok(None) => {
                tracing::debug!(server = %server_name, "server stdout closed");
                break;
            }
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "failed to read server stdout");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a closed-channel error.
    lock_pending(&pending).clear();
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
