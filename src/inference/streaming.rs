//! NDJSON streaming response parser for Ollama `/api/chat`.
//!
//! Reads a byte stream, splits it on newlines (a JSON object may straddle
//! two network chunks), parses each line as a chat chunk, and yields
//! `ChatDelta`s until the backend sends `done: true` or closes the body.

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::types::{ChatChunk, ChatDelta};

// ─── NDJSON line parser ──────────────────────────────────────────────────────

/// Parse a `reqwest::Response` body into chat deltas.
pub fn parse_chat_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ChatDelta, InferenceError>> + Send {
    let bytes = response.bytes_stream().map(|chunk| {
        chunk
            .map(|b| b.to_vec())
            .map_err(|e| InferenceError::StreamError {
                reason: format!("stream read error: {e}"),
            })
    });
    parse_ndjson(bytes)
}

/// Parse any stream of byte chunks into chat deltas.
///
/// The stream ends after the first `done: true` delta, after the first
/// error, or when the input ends.
pub fn parse_ndjson<S>(bytes: S) -> impl Stream<Item = Result<ChatDelta, InferenceError>> + Send
where
    S: Stream<Item = Result<Vec<u8>, InferenceError>> + Send + Unpin,
{
    struct State<S> {
        bytes: S,
        buffer: Vec<u8>,
        finished: bool,
    }

    stream::unfold(
        State {
            bytes,
            buffer: Vec::new(),
            finished: false,
        },
        |mut state| async move {
            if state.finished {
                return None;
            }
            loop {
                // Complete line in the buffer?
                if let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                    match parse_line(&line) {
                        Ok(Some(delta)) => {
                            state.finished = delta.done;
                            return Some((Ok(delta), state));
                        }
                        Ok(None) => continue, // blank line
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                    }
                }

                // Need more data from the stream
                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        // Stream ended; a final line may lack its newline
                        state.finished = true;
                        let rest = std::mem::take(&mut state.buffer);
                        return match parse_line(&rest) {
                            Ok(Some(delta)) => Some((Ok(delta), state)),
                            Ok(None) => None,
                            Err(e) => Some((Err(e), state)),
                        };
                    }
                }
            }
        },
    )
}

/// Parse one NDJSON line. Blank lines yield `None`.
fn parse_line(line: &[u8]) -> Result<Option<ChatDelta>, InferenceError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk = serde_json::from_str(text).map_err(|e| InferenceError::StreamError {
        reason: format!("failed to parse chunk: {e}"),
    })?;

    if let Some(message) = chunk.error {
        return Err(InferenceError::ModelError { message });
    }

    Ok(Some(ChatDelta::from(chunk)))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, InferenceError>> + Send + Unpin {
        let owned: Vec<Result<Vec<u8>, InferenceError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<Result<ChatDelta, InferenceError>> {
        parse_ndjson(chunks(parts)).collect().await
    }

    #[tokio::test]
    async fn test_parses_line_split_across_chunks() {
        let out = collect(&[
            r#"{"message":{"role":"assistant","content":"Hel"#,
            r#"lo"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"!"},"done":true}"#,
            "\n",
        ])
        .await;
        let texts: Vec<String> = out.into_iter().map(|d| d.unwrap().content).collect();
        assert_eq!(texts, vec!["Hello", "!"]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let out = collect(&[r#"{"message":{"content":"end"},"done":true}"#]).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn test_stops_after_done() {
        let out = collect(&[
            "{\"message\":{\"content\":\"a\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"ignored\"},\"done\":false}\n",
        ])
        .await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_inline_error_becomes_model_error() {
        let out = collect(&["{\"error\":\"model 'x' not found\"}\n"]).await;
        assert_eq!(out.len(), 1);
        match out[0].as_ref().unwrap_err() {
            InferenceError::ModelError { message } => assert_eq!(message, "model 'x' not found"),
            other => panic!("expected ModelError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_line_is_stream_error() {
        let out = collect(&["not json\n"]).await;
        assert!(matches!(out[0], Err(InferenceError::StreamError { .. })));
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let out = collect(&["\n\n{\"message\":{\"content\":\"x\"},\"done\":true}\n"]).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().content, "x");
    }
}
