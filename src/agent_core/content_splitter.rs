//! Content splitter: separates answer text from reasoning in a token stream.
//!
//! Models that reason inline wrap it in `<think>...</think>`. Either tag can
//! be split across two streamed chunks, so the splitter buffers any trailing
//! text that could be the start of a tag until the next chunk decides it.
//!
//! Output is a list of ready-to-emit chunks: answer text passes through
//! unchanged, reasoning is reported as a `thinking_start` marker followed by
//! a `thinking_complete` marker carrying the full reasoning text.

use std::time::Instant;

use super::events::{emit_execution_event, ExecutionEvent};

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterState {
    Outside,
    /// `native` is set when the reasoning arrives in the delta's separate
    /// `thinking` field instead of inline tags.
    InsideThinking { native: bool },
}

/// Per-turn splitter. Create one for each answer.
#[derive(Debug)]
pub struct ContentSplitter {
    state: SplitterState,
    /// Trailing text that may be the beginning of a tag.
    pending: String,
    thinking: String,
    thinking_started: Option<Instant>,
    /// Answer text emitted since the last `take_visible`.
    visible: String,
}

impl Default for ContentSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentSplitter {
    pub fn new() -> Self {
        Self {
            state: SplitterState::Outside,
            pending: String::new(),
            thinking: String::new(),
            thinking_started: None,
            visible: String::new(),
        }
    }

    pub fn state(&self) -> SplitterState {
        self.state
    }

    /// Feed a content chunk.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        if text.is_empty() {
            return out;
        }

        if self.state == (SplitterState::InsideThinking { native: true }) {
            self.close_thinking(&mut out);
        }

        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(text);

        loop {
            match self.state {
                SplitterState::Outside => match buf.find(THINK_OPEN) {
                    Some(idx) => {
                        self.emit_text(&buf[..idx], &mut out);
                        self.open_thinking(false, &mut out);
                        buf.drain(..idx + THINK_OPEN.len());
                    }
                    None => {
                        let keep = partial_tag_suffix(&buf, THINK_OPEN);
                        let split = buf.len() - keep;
                        self.emit_text(&buf[..split], &mut out);
                        self.pending = buf[split..].to_string();
                        break;
                    }
                },
                SplitterState::InsideThinking { .. } => match buf.find(THINK_CLOSE) {
                    Some(idx) => {
                        self.thinking.push_str(&buf[..idx]);
                        self.close_thinking(&mut out);
                        buf.drain(..idx + THINK_CLOSE.len());
                    }
                    None => {
                        let keep = partial_tag_suffix(&buf, THINK_CLOSE);
                        let split = buf.len() - keep;
                        self.thinking.push_str(&buf[..split]);
                        self.pending = buf[split..].to_string();
                        break;
                    }
                },
            }
        }

        out
    }

    /// Feed reasoning text reported separately from content.
    pub fn push_thinking(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        if text.is_empty() {
            return out;
        }
        if self.state == SplitterState::Outside {
            let held = std::mem::take(&mut self.pending);
            self.emit_text(&held, &mut out);
            self.open_thinking(true, &mut out);
        }
        self.thinking.push_str(text);
        out
    }

    /// Flush held text and close an unterminated reasoning segment.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        let held = std::mem::take(&mut self.pending);
        match self.state {
            SplitterState::Outside => self.emit_text(&held, &mut out),
            SplitterState::InsideThinking { .. } => {
                self.thinking.push_str(&held);
                self.close_thinking(&mut out);
            }
        }
        out
    }

    /// Answer text emitted since the previous call.
    pub fn take_visible(&mut self) -> String {
        std::mem::take(&mut self.visible)
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<String>) {
        if text.is_empty() {
            return;
        }
        self.visible.push_str(text);
        out.push(text.to_string());
    }

    fn open_thinking(&mut self, native: bool, out: &mut Vec<String>) {
        self.state = SplitterState::InsideThinking { native };
        self.thinking_started = Some(Instant::now());
        out.push(emit_execution_event(ExecutionEvent::thinking_start()));
    }

    fn close_thinking(&mut self, out: &mut Vec<String>) {
        let duration_ms = self
            .thinking_started
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let text = std::mem::take(&mut self.thinking);
        out.push(emit_execution_event(ExecutionEvent::thinking_complete(
            text.trim(),
            duration_ms,
        )));
        self.state = SplitterState::Outside;
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of `tag`.
fn partial_tag_suffix(buf: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| {
            buf.len() >= len
                && buf.is_char_boundary(buf.len() - len)
                && buf.ends_with(&tag[..len])
        })
        .unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
