//! In-process fakes for the model backend and tool servers (tests only).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::inference::types::{ChatDelta, ChatMessage, DeltaStream, SimpleChatRequest, TextStream};
use crate::inference::{InferenceError, ModelClient};
use crate::mcp_client::types::{McpTool, ServerDescriptor, ToolCallResponse, ToolContent};
use crate::mcp_client::{McpError, ServerConnector, ToolServer};

// ─── Model ───────────────────────────────────────────────────────────────────

/// What one scripted `chat_stream` call does.
#[derive(Debug, Clone)]
pub enum FakePhase {
    /// Yield these deltas, then end.
    Deltas(Vec<ChatDelta>),
    /// Fail before the stream opens.
    FailOpen(String),
    /// Yield these deltas, then fail.
    FailMidStream(Vec<ChatDelta>, String),
    /// Yield these deltas, then never finish.
    Hang(Vec<ChatDelta>),
}

#[derive(Default)]
struct ModelState {
    supports_tools: Option<bool>,
    phases: VecDeque<FakePhase>,
    repeat_last: Option<FakePhase>,
    simple_chunks: Vec<String>,
    simple_error: Option<String>,
    simple_hang: bool,
    chat_requests: Vec<Vec<ChatMessage>>,
    simple_requests: Vec<SimpleChatRequest>,
}

/// Scripted `ModelClient`.
#[derive(Clone, Default)]
pub struct FakeModelClient {
    state: Arc<Mutex<ModelState>>,
}

impl FakeModelClient {
    /// A client whose model supports tools.
    pub fn with_tools() -> Self {
        let client = Self::default();
        client.state.lock().unwrap().supports_tools = Some(true);
        client
    }

    /// A client whose model has no tool support.
    pub fn without_tools() -> Self {
        let client = Self::default();
        client.state.lock().unwrap().supports_tools = Some(false);
        client
    }

    /// A client whose capability query fails.
    pub fn capability_error() -> Self {
        Self::default()
    }

    pub fn phase(self, phase: FakePhase) -> Self {
        self.state.lock().unwrap().phases.push_back(phase);
        self
    }

    /// Use `phase` for every call once the script runs out.
    pub fn repeat(self, phase: FakePhase) -> Self {
        self.state.lock().unwrap().repeat_last = Some(phase);
        self
    }

    pub fn simple_chunks(self, chunks: &[&str]) -> Self {
        self.state.lock().unwrap().simple_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn simple_error(self, message: &str) -> Self {
        self.state.lock().unwrap().simple_error = Some(message.to_string());
        self
    }

    /// Keep the simple stream open after its chunks instead of ending it.
    pub fn simple_hang(self) -> Self {
        self.state.lock().unwrap().simple_hang = true;
        self
    }

    /// Messages sent on each `chat_stream` call.
    pub fn chat_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.state.lock().unwrap().chat_requests.clone()
    }

    pub fn simple_requests(&self) -> Vec<SimpleChatRequest> {
        self.state.lock().unwrap().simple_requests.clone()
    }
}

#[async_trait]
impl ModelClient for FakeModelClient {
    async fn supports_tools(&self, _model: &str) -> Result<bool, InferenceError> {
        self.state
            .lock()
            .unwrap()
            .supports_tools
            .ok_or(InferenceError::ConnectionFailed {
                endpoint: "fake".into(),
                reason: "capability query failed".into(),
            })
    }

    async fn chat_stream(
        &self,
        _model: &str,
        messages: Vec<ChatMessage>,
        _tools: Vec<serde_json::Value>,
    ) -> Result<DeltaStream, InferenceError> {
        let phase = {
            let mut state = self.state.lock().unwrap();
            state.chat_requests.push(messages);
            state
                .phases
                .pop_front()
                .or_else(|| state.repeat_last.clone())
                .unwrap_or(FakePhase::Deltas(vec![ChatDelta::text("")]))
        };

        let ok = |deltas: Vec<ChatDelta>| stream::iter(deltas.into_iter().map(Ok));
        match phase {
            FakePhase::Deltas(deltas) => Ok(Box::pin(ok(deltas))),
            FakePhase::FailOpen(message) => Err(InferenceError::ConnectionFailed {
                endpoint: "fake".into(),
                reason: message,
            }),
            FakePhase::FailMidStream(deltas, message) => Ok(Box::pin(ok(deltas).chain(
                stream::once(async move { Err(InferenceError::StreamError { reason: message }) }),
            ))),
            FakePhase::Hang(deltas) => Ok(Box::pin(ok(deltas).chain(stream::pending()))),
        }
    }

    async fn simple_stream(
        &self,
        _model: &str,
        request: SimpleChatRequest,
    ) -> Result<TextStream, InferenceError> {
        let mut state = self.state.lock().unwrap();
        state.simple_requests.push(request);
        if let Some(message) = state.simple_error.clone() {
            return Err(InferenceError::ModelError { message });
        }
        let chunks = stream::iter(state.simple_chunks.clone().into_iter().map(Ok));
        if state.simple_hang {
            Ok(Box::pin(chunks.chain(stream::pending())))
        } else {
            Ok(Box::pin(chunks))
        }
    }
}

// ─── Tool Servers ────────────────────────────────────────────────────────────

#[derive(Clone)]
enum FakeReply {
    Ok(String),
    ToolError(String),
    Fail(String),
}

/// In-process `ToolServer`.
#[derive(Clone)]
pub struct FakeToolServer {
    id: String,
    tools: Vec<(McpTool, FakeReply)>,
    failing_list: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl FakeToolServer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tools: Vec::new(),
            failing_list: false,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tool(name: &str) -> McpTool {
        McpTool {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    /// A tool that answers with `text`.
    pub fn with_tool(mut self, name: &str, text: &str) -> Self {
        self.tools.push((Self::tool(name), FakeReply::Ok(text.to_string())));
        self
    }

    /// A tool that answers with `isError: true`.
    pub fn with_error_tool(mut self, name: &str, text: &str) -> Self {
        self.tools
            .push((Self::tool(name), FakeReply::ToolError(text.to_string())));
        self
    }

    /// A tool whose dispatch fails at the transport level.
    pub fn with_failing_tool(mut self, name: &str, reason: &str) -> Self {
        self.tools.push((Self::tool(name), FakeReply::Fail(reason.to_string())));
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.failing_list = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}

#[async_trait]
impl ToolServer for FakeToolServer {
    fn server_id(&self) -> &str {
        &self.id
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        if self.failing_list {
            return Err(McpError::ServerError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            });
        }
        Ok(self.tools.iter().map(|(t, _)| t.clone()).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResponse, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .tools
            .iter()
            .find(|(t, _)| t.name == name)
            .map(|(_, r)| r.clone());
        match reply {
            Some(FakeReply::Ok(text)) => Ok(ToolCallResponse::ok_text(&text)),
            Some(FakeReply::ToolError(text)) => Ok(ToolCallResponse {
                content: vec![ToolContent::text(&text)],
                is_error: true,
            }),
            Some(FakeReply::Fail(reason)) => Err(McpError::TransportError {
                server: self.id.clone(),
                reason,
            }),
            None => Err(McpError::ServerError {
                code: -32602,
                message: format!("unknown tool {name}"),
                data: None,
            }),
        }
    }

    async fn shutdown(&self) -> Result<(), McpError> {
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// `ServerConnector` over a fixed set of fake servers.
#[derive(Clone, Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeToolServer>,
    failing: HashSet<String>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, server: FakeToolServer) -> Self {
        self.servers.insert(server.id.clone(), server);
        self
    }

    /// Connecting to `server_id` fails.
    pub fn failing(mut self, server_id: &str) -> Self {
        self.failing.insert(server_id.to_string());
        self
    }
}

#[async_trait]
impl ServerConnector for FakeConnector {
    async fn connect(
        &self,
        server_id: &str,
        _descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn ToolServer>, McpError> {
        if self.failing.contains(server_id) {
            return Err(McpError::SpawnFailed {
                name: server_id.to_string(),
                reason: "No such file or directory (os error 2)".into(),
            });
        }
        self.servers
            .get(server_id)
            .cloned()
            .map(|s| Arc::new(s) as Arc<dyn ToolServer>)
            .ok_or(McpError::ConfigError {
                reason: format!("no fake server named '{server_id}'"),
            })
    }
}

/// Descriptor named `name`.
pub fn descriptor(name: &str) -> ServerDescriptor {
    let mut d = ServerDescriptor::new("python", &format!("{name}.py"));
    d.name = Some(name.to_string());
    d
}
