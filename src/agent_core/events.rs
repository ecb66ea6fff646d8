//! Execution events and their inline wire encoding.
//!
//! Tool calls and reasoning segments are reported to the UI as markers
//! embedded in the answer stream at the point they occur. A marker is
//! `\u{1E}EXEC` + compact JSON + `\u{1F}`; the ASCII record and unit
//! separators never appear in model answer text.
//!
//! Markers are UI-only. The Conductor never puts them into a message that
//! goes back to the model, and `strip_markers` recovers the plain answer
//! for the transcript.

use serde::{Deserialize, Serialize};

use super::types::ToolOutcome;

/// Opens a marker.
pub const MARKER_START: &str = "\u{1E}EXEC";

/// Closes a marker.
pub const MARKER_END: char = '\u{1F}';

// ─── Event Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolStart,
    ToolComplete,
    ThinkingStart,
    ThinkingComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Executing,
    Complete,
    Error,
}

/// UI-facing description of a tool call or reasoning segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub status: EventStatus,
    /// Shared by the start/complete pair of one tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    /// Tool output, or the reasoning text for `thinking_complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ExecutionEvent {
    fn bare(kind: EventKind, status: EventStatus) -> Self {
        Self {
            kind,
            status,
            call_id: None,
            tool_name: None,
            arguments: None,
            result: None,
            duration_ms: None,
            is_error: None,
        }
    }

    pub fn tool_start(call_id: &str, tool_name: &str, arguments: &serde_json::Value) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            tool_name: Some(tool_name.to_string()),
            arguments: Some(arguments.clone()),
            ..Self::bare(EventKind::ToolStart, EventStatus::Executing)
        }
    }

    pub fn tool_complete(outcome: &ToolOutcome) -> Self {
        let status = if outcome.is_error {
            EventStatus::Error
        } else {
            EventStatus::Complete
        };
        Self {
            call_id: Some(outcome.call_id.clone()),
            tool_name: Some(outcome.name.clone()),
            arguments: Some(outcome.arguments.clone()),
            result: Some(outcome.result.clone()),
            duration_ms: Some(outcome.duration_ms),
            is_error: Some(outcome.is_error),
            ..Self::bare(EventKind::ToolComplete, status)
        }
    }

    pub fn thinking_start() -> Self {
        Self::bare(EventKind::ThinkingStart, EventStatus::Executing)
    }

    pub fn thinking_complete(text: &str, duration_ms: u64) -> Self {
        Self {
            result: Some(text.to_string()),
            duration_ms: Some(duration_ms),
            ..Self::bare(EventKind::ThinkingComplete, EventStatus::Complete)
        }
    }
}

// ─── Markers ─────────────────────────────────────────────────────────────────

/// Everything that can appear inside a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "marker", rename_all = "snake_case")]
pub enum StreamMarker {
    Event(ExecutionEvent),
    /// The model requested tool calls at this point of the answer.
    ToolCallPosition,
    /// All tool calls of the current delta have been handled.
    ToolCallsComplete,
}

/// Render a marker for embedding in the output stream.
pub fn encode_marker(marker: &StreamMarker) -> String {
    match serde_json::to_string(marker) {
        Ok(json) => format!("{MARKER_START}{json}{MARKER_END}"),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode execution marker");
            String::new()
        }
    }
}

/// Shorthand for `encode_marker(&StreamMarker::Event(event))`.
pub fn emit_execution_event(event: ExecutionEvent) -> String {
    encode_marker(&StreamMarker::Event(event))
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// A piece of emitted output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSegment {
    Text(String),
    Marker(StreamMarker),
}

/// Split emitted output into text and markers, in order.
///
/// A marker that is unterminated or does not decode is kept as text.
pub fn parse_stream(text: &str) -> Vec<StreamSegment> {
    let mut segments = Vec::new();
    let mut pending = String::new();
    let mut rest = text;

    while let Some(start) = rest.find(MARKER_START) {
        pending.push_str(&rest[..start]);
        let body_start = start + MARKER_START.len();

        let decoded = rest[body_start..].find(MARKER_END).and_then(|len| {
            let json = &rest[body_start..body_start + len];
            serde_json::from_str::<StreamMarker>(json)
                .ok()
                .map(|marker| (marker, body_start + len + MARKER_END.len_utf8()))
        });

        match decoded {
            Some((marker, consumed)) => {
                if !pending.is_empty() {
                    segments.push(StreamSegment::Text(std::mem::take(&mut pending)));
                }
                segments.push(StreamSegment::Marker(marker));
                rest = &rest[consumed..];
            }
            None => {
                pending.push_str(MARKER_START);
                rest = &rest[body_start..];
            }
        }
    }

    pending.push_str(rest);
    if !pending.is_empty() {
        segments.push(StreamSegment::Text(pending));
    }
    segments
}

/// The visible answer with every marker removed.
pub fn strip_markers(text: &str) -> String {
    parse_stream(text)
        .into_iter()
        .filter_map(|seg| match seg {
            StreamSegment::Text(t) => Some(t),
            StreamSegment::Marker(_) => None,
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(is_error: bool) -> ToolOutcome {
        ToolOutcome {
            call_id: "c1".into(),
            name: "search".into(),
            arguments: serde_json::json!({"q": "x"}),
            result: "found".into(),
            is_error,
            duration_ms: 12,
        }
    }

    #[test]
    fn test_event_payload_field_names() {
        let json = serde_json::to_value(ExecutionEvent::tool_complete(&outcome(false))).unwrap();
        assert_eq!(json["type"], "tool_complete");
        assert_eq!(json["status"], "complete");
        assert_eq!(json["toolName"], "search");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["isError"], false);
        assert_eq!(json["callId"], "c1");
    }

    #[test]
    fn test_failed_tool_has_error_status() {
        let event = ExecutionEvent::tool_complete(&outcome(true));
        assert_eq!(event.status, EventStatus::Error);
        assert_eq!(event.is_error, Some(true));
    }

    #[test]
    fn test_thinking_start_omits_tool_fields() {
        let json = serde_json::to_value(ExecutionEvent::thinking_start()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "thinking_start", "status": "executing"}));
    }

    #[test]
    fn test_marker_uses_reserved_delimiters() {
        let encoded = encode_marker(&StreamMarker::ToolCallPosition);
        assert!(encoded.starts_with(MARKER_START));
        assert!(encoded.ends_with(MARKER_END));
        assert!(encoded.contains(r#""marker":"tool_call_position""#));
    }

    #[test]
    fn test_parse_stream_preserves_order() {
        let text = format!(
            "Let me look.{}{}Done.",
            encode_marker(&StreamMarker::ToolCallPosition),
            emit_execution_event(ExecutionEvent::tool_start("c1", "search", &serde_json::json!({})))
        );
        let segments = parse_stream(&text);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], StreamSegment::Text("Let me look.".into()));
        assert_eq!(segments[1], StreamSegment::Marker(StreamMarker::ToolCallPosition));
        assert!(matches!(
            &segments[2],
            StreamSegment::Marker(StreamMarker::Event(e)) if e.kind == EventKind::ToolStart
        ));
        assert_eq!(segments[3], StreamSegment::Text("Done.".into()));
    }

    #[test]
    fn test_strip_markers_keeps_visible_text() {
        let text = format!(
            "A{}B{}C",
            emit_execution_event(ExecutionEvent::thinking_start()),
            encode_marker(&StreamMarker::ToolCallsComplete)
        );
        assert_eq!(strip_markers(&text), "ABC");
    }

    #[test]
    fn test_unterminated_marker_is_text() {
        let text = format!("x{MARKER_START}{{\"marker\":");
        assert_eq!(parse_stream(&text), vec![StreamSegment::Text(text.clone())]);
    }

    #[test]
    fn test_plain_text_is_single_segment() {
        assert_eq!(
            parse_stream("héllo wörld"),
            vec![StreamSegment::Text("héllo wörld".into())]
        );
        assert!(parse_stream("").is_empty());
    }
}
