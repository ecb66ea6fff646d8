//! Conductor: the multi-phase tool-calling loop behind one answer.
//!
//! One call to [`Conductor::run`] produces a lazy stream of text chunks:
//!
//! 1. If the token is already tripped, the stream is empty.
//! 2. If the model lacks tool support (or no tools are registered), the
//!    plain answer from `simple_stream` is relayed chunk by chunk.
//! 3. Otherwise each phase streams one model response. Content goes through
//!    the `ContentSplitter`; tool calls are resolved against the registry,
//!    invoked, reported as execution markers, and fed back as tool
//!    messages. A phase without tool calls ends the answer.
//!
//! The working message list is rebuilt on every call and only ever holds
//! plain text and structured tool results, never markers.

use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::inference::types::{ChatMessage, DeltaStream, SimpleChatRequest, ToolCall};
use crate::inference::ModelClient;
use crate::mcp_client::{ToolEntry, ToolRegistry};

use super::cancellation::CancellationToken;
use super::content_splitter::ContentSplitter;
use super::conversation::ConversationTranscript;
use super::errors::ConductorError;
use super::events::{emit_execution_event, encode_marker, ExecutionEvent, StreamMarker};
use super::types::ToolOutcome;


// ─── Constants ───────────────────────────────────────────────────────────────

/// Default upper bound on model round-trips per answer.
pub const DEFAULT_MAX_PHASES: usize = 10;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant running on the user's \
computer. Use the available tools when they help answer the question, and answer directly \
when they do not. Base your answer on tool results when you used them.";

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Model name passed to the backend.
    pub model: String,
    pub max_phases: usize,
    pub system_prompt: String,
    /// Run the tool calls of one delta concurrently. Results are still
    /// appended in request order.
    pub parallel_tool_calls: bool,
}

impl ConductorConfig {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            max_phases: DEFAULT_MAX_PHASES,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            parallel_tool_calls: false,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.name.clone(),
            max_phases: config.conductor.max_phases.max(1),
            system_prompt: config
                .conductor
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            parallel_tool_calls: config.conductor.parallel_tool_calls,
        }
    }
}

// ─── Conductor ───────────────────────────────────────────────────────────────

/// Orchestrates answers over a model client and a shared tool registry.
///
/// Cheap to clone; the client and registry are shared.
#[derive(Clone)]
pub struct Conductor {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    config: ConductorConfig,
}

impl Conductor {
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        config: ConductorConfig,
    ) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Produce the answer to the last message of `transcript`.
    ///
    /// The stream never yields an error: failures become one terminal text
    /// chunk. Dropping the stream drops any in-flight model request or tool
    /// call with it.
    pub fn run(
        &self,
        transcript: &ConversationTranscript,
        memories: &str,
        cancel: &CancellationToken,
    ) -> impl Stream<Item = String> + Send + 'static {
        let client = Arc::clone(&self.client);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let history = transcript.to_model_messages();
        let memories = memories.to_string();
        let cancel = cancel.clone();

        stream! {
            // ── Init ──
            if cancel.is_cancelled() {
                tracing::info!("answer cancelled before start");
                return;
            }

            // ── CapabilityCheck ──
            let supports_tools = match cancel.abortable(client.supports_tools(&config.model)).await {
                None => return,
                Some(Ok(supported)) => supported,
                Some(Err(e)) => {
                    tracing::warn!(model = %config.model, error = %e, "capability check failed, answering without tools");
                    false
                }
            };

            // ── SimpleStream ──
            if !supports_tools || registry.is_empty() {
                tracing::info!(
                    model = %config.model,
                    supports_tools,
                    tool_count = registry.len(),
                    "answering without tools"
                );
                let request = SimpleChatRequest {
                    system_prompt: config.system_prompt.clone(),
                    memories: memories.clone(),
                    messages: history,
                };
                let mut chunks = match cancel.abortable(client.simple_stream(&config.model, request)).await {
                    None => return,
                    Some(Ok(chunks)) => chunks,
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "simple answer failed");
                        yield format!("Error in simple mode: {e}");
                        return;
                    }
                };
                loop {
                    let next = match cancel.abortable(chunks.next()).await {
                        None => return,
                        Some(next) => next,
                    };
                    match next {
                        Some(Ok(chunk)) => {
                            if cancel.is_cancelled() {
                                return;
                            }
                            yield chunk;
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "simple answer stream failed");
                            yield format!("Error in simple mode: {e}");
                            return;
                        }
                        None => return,
                    }
                }
            }

            // ── PhaseLoop ──
            let tools = registry.to_model_tools();
            let mut working = working_messages(&config.system_prompt, &memories, history);
            let mut splitter = ContentSplitter::new();
            let mut phase: usize = 0;

            loop {
                if cancel.is_cancelled() {
                    return;
                }
                phase += 1;
                tracing::info!(phase, messages = working.len(), "conductor phase");

                let opened = cancel
                    .abortable(open_phase(client.as_ref(), &config.model, working.clone(), tools.clone()))
                    .await;
                let mut deltas = match opened {
                    None => return,
                    Some(Ok(deltas)) => deltas,
                    Some(Err(e)) => {
                        tracing::error!(phase, error = %e, "model call failed");
                        yield format!("Error in conductor mode: {e}");
                        return;
                    }
                };

                let mut received = 0usize;
                let mut phase_calls: Vec<ToolCall> = Vec::new();
                let mut tool_messages: Vec<ChatMessage> = Vec::new();

                loop {
                    let next = match cancel.abortable(next_delta(&mut deltas)).await {
                        None => return,
                        Some(next) => next,
                    };
                    let delta = match next {
                        Some(Ok(delta)) => delta,
                        Some(Err(e)) => {
                            for chunk in splitter.finish() {
                                yield chunk;
                            }
                            tracing::error!(phase, error = %e, "model stream failed");
                            yield format!("Error in conductor mode: {e}");
                            return;
                        }
                        None => break,
                    };
                    if cancel.is_cancelled() {
                        return;
                    }
                    received += 1;

                    if let Some(thinking) = delta.thinking.as_deref() {
                        for chunk in splitter.push_thinking(thinking) {
                            yield chunk;
                        }
                    }
                    for chunk in splitter.push(&delta.content) {
                        yield chunk;
                    }

                    if !delta.tool_calls.is_empty() {
                        for chunk in splitter.finish() {
                            yield chunk;
                        }
                        yield encode_marker(&StreamMarker::ToolCallPosition);

                        let prepared: Vec<PreparedCall> =
                            delta.tool_calls.iter().map(PreparedCall::new).collect();

                        if config.parallel_tool_calls && prepared.len() > 1 {
                            for call in &prepared {
                                if registry.resolve(&call.name).is_some() {
                                    yield emit_execution_event(call.start_event());
                                } else {
                                    tracing::warn!(tool = %call.name, "model requested unknown tool");
                                    yield not_found_message(&call.name);
                                }
                            }

                            let invocations = prepared.iter().filter_map(|call| {
                                registry.resolve(&call.name).map(|entry| invoke_tool(entry, call))
                            });
                            let mut outcomes = match cancel.abortable(join_all(invocations)).await {
                                None => return,
                                Some(outcomes) => outcomes.into_iter(),
                            };

                            for call in &prepared {
                                let outcome = registry
                                    .resolve(&call.name)
                                    .and_then(|_| outcomes.next());
                                match outcome {
                                    Some(outcome) => {
                                        yield emit_execution_event(ExecutionEvent::tool_complete(&outcome));
                                        tool_messages.push(outcome.to_tool_message());
                                    }
                                    None => tool_messages.push(ChatMessage::tool(
                                        Some(&call.name),
                                        not_found_message(&call.name),
                                    )),
                                }
                            }
                        } else {
                            for call in &prepared {
                                if cancel.is_cancelled() {
                                    return;
                                }
                                match registry.resolve(&call.name) {
                                    Some(entry) => {
                                        yield emit_execution_event(call.start_event());
                                        let outcome = match cancel.abortable(invoke_tool(entry, call)).await {
                                            None => return,
                                            Some(outcome) => outcome,
                                        };
                                        yield emit_execution_event(ExecutionEvent::tool_complete(&outcome));
                                        tool_messages.push(outcome.to_tool_message());
                                    }
                                    None => {
                                        tracing::warn!(tool = %call.name, "model requested unknown tool");
                                        let text = not_found_message(&call.name);
                                        yield text.clone();
                                        tool_messages.push(ChatMessage::tool(Some(&call.name), text));
                                    }
                                }
                            }
                        }

                        yield encode_marker(&StreamMarker::ToolCallsComplete);
                        phase_calls.extend(delta.tool_calls.iter().cloned());
                    }

                    if delta.done {
                        break;
                    }
                }

                for chunk in splitter.finish() {
                    yield chunk;
                }

                if received == 0 {
                    let e = ConductorError::EmptyResponse;
                    tracing::error!(phase, error = %e, "model call failed");
                    yield format!("Error in conductor mode: {e}");
                    return;
                }

                let visible = splitter.take_visible();
                if phase_calls.is_empty() {
                    tracing::info!(phase, "answer complete");
                    return;
                }

                working.push(ChatMessage::assistant_with_calls(visible, phase_calls));
                working.extend(tool_messages);

                if phase >= config.max_phases {
                    tracing::warn!(phase, "phase limit reached with tool calls still pending");
                    yield format!("\n\nConversation ended after {phase} phases.");
                    return;
                }
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// System prompt, optional memories, then the transcript.
pub(crate) fn working_messages(
    system_prompt: &str,
    memories: &str,
    history: Vec<ChatMessage>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    if !memories.is_empty() {
        messages.push(ChatMessage::tool(None, format!("User Memories: {memories}")));
    }
    messages.extend(history);
    messages
}

pub(crate) fn not_found_message(name: &str) -> String {
    format!("Error: Tool '{name}' not found")
}

async fn open_phase(
    client: &dyn ModelClient,
    model: &str,
    messages: Vec<ChatMessage>,
    tools: Vec<serde_json::Value>,
) -> Result<DeltaStream, ConductorError> {
    Ok(client.chat_stream(model, messages, tools).await?)
}

async fn next_delta(
    deltas: &mut DeltaStream,
) -> Option<Result<crate::inference::ChatDelta, ConductorError>> {
    deltas
        .next()
        .await
        .map(|delta| delta.map_err(ConductorError::from))
}

/// A tool call with its correlation id and normalized arguments.
struct PreparedCall {
    call_id: String,
    name: String,
    arguments: serde_json::Value,
}

impl PreparedCall {
    fn new(call: &ToolCall) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            name: call.function.name.clone(),
            arguments: normalize_arguments(call.function.arguments.clone()),
        }
    }

    fn start_event(&self) -> ExecutionEvent {
        ExecutionEvent::tool_start(&self.call_id, &self.name, &self.arguments)
    }
}

/// Arguments as a JSON object. Some models send a JSON-encoded string or
/// nothing at all.
fn normalize_arguments(arguments: serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::String(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(parsed @ serde_json::Value::Object(_)) => parsed,
            _ => serde_json::Value::String(raw),
        },
        other => other,
    }
}

/// Invoke one resolved tool. Dispatch failures become error outcomes.
async fn invoke_tool(entry: &ToolEntry, call: &PreparedCall) -> ToolOutcome {
    let start = Instant::now();
    let (result, is_error) = match entry.invoke(call.arguments.clone()).await {
        Ok(response) => (response.joined_text(), response.is_error),
        Err(e) => {
            tracing::warn!(tool = %call.name, server = %entry.server_id, error = %e, "tool call failed");
            (format!("Error: {e}"), true)
        }
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        tool = %call.name,
        server = %entry.server_id,
        duration_ms,
        is_error,
        "tool call finished"
    );

    ToolOutcome {
        call_id: call.call_id.clone(),
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        result,
        is_error,
        duration_ms,
    }
}
