//! Ollama inference client.
//!
//! Sends chat requests to a local Ollama endpoint and streams back deltas
//! carrying text, native reasoning, and tool calls. Also answers whether a
//! model supports tool calling.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::streaming::parse_chat_stream;
use super::types::{
    ChatMessage, ChatRequest, DeltaStream, ModelOptions, ShowResponse, SimpleChatRequest,
    TextStream,
};
use crate::config::ModelConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for metadata calls such as `/api/show`.
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

// ─── ModelClient ─────────────────────────────────────────────────────────────

/// The model-serving backend, as seen by the Conductor.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Whether `model` accepts a `tools` list.
    async fn supports_tools(&self, model: &str) -> Result<bool, InferenceError>;

    /// Stream a chat response for `messages`, offering `tools`.
    async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<serde_json::Value>,
    ) -> Result<DeltaStream, InferenceError>;

    /// Stream a plain answer with no tools offered.
    async fn simple_stream(
        &self,
        model: &str,
        request: SimpleChatRequest,
    ) -> Result<TextStream, InferenceError>;
}

// ─── OllamaClient ────────────────────────────────────────────────────────────

/// Client for a local Ollama server.
pub struct OllamaClient {
    /// HTTP client for streaming chat requests.
    http_stream: HttpClient,
    /// HTTP client for short metadata requests.
    http: HttpClient,
    base_url: String,
    options: ModelOptions,
    request_timeout_secs: u64,
    /// `model name → supports tools`.
    capabilities: Mutex<HashMap<String, bool>>,
}

impl OllamaClient {
    /// Create a client from the model configuration.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn new(config: &ModelConfig) -> Result<Self, InferenceError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("model base_url must be an http(s) URL, got '{}'", config.base_url),
            });
        }

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http_stream,
            http,
            base_url,
            options: ModelOptions {
                temperature: config.temperature,
                num_ctx: config.num_ctx,
            },
            request_timeout_secs: config.request_timeout_secs,
            capabilities: Mutex::new(HashMap::new()),
        })
    }

    fn cached_capability(&self, model: &str) -> Option<bool> {
        self.capabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .copied()
    }

    async fn post_chat(&self, body: &ChatRequest) -> Result<DeltaStream, InferenceError> {
        let url = format!("{}/api/chat", self.base_url);

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.len(),
            "chat request"
        );

        let response = self
            .http_stream
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(&url, self.request_timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(parse_chat_stream(response)))
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn supports_tools(&self, model: &str) -> Result<bool, InferenceError> {
        if let Some(cached) = self.cached_capability(model) {
            return Ok(cached);
        }

        let url = format!("{}/api/show", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(&url, METADATA_TIMEOUT.as_secs(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let show: ShowResponse = response.json().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse /api/show response: {e}"),
        })?;

        let supported = match show.capabilities {
            Some(caps) => caps.iter().any(|c| c == "tools"),
            // Older servers omit `capabilities`; tool-capable templates
            // reference `.Tools`.
            None => show
                .template
                .as_deref()
                .is_some_and(|t| t.contains(".Tools")),
        };

        tracing::info!(model = %model, supports_tools = supported, "model capabilities");
        self.capabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.to_string(), supported);

        Ok(supported)
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<serde_json::Value>,
    ) -> Result<DeltaStream, InferenceError> {
        let body = ChatRequest {
            model: model.to_string(),
            messages,
            tools,
            stream: true,
            options: self.options.clone(),
        };
        self.post_chat(&body).await
    }

    async fn simple_stream(
        &self,
        model: &str,
        request: SimpleChatRequest,
    ) -> Result<TextStream, InferenceError> {
        let body = ChatRequest {
            model: model.to_string(),
            messages: request.to_messages(),
            tools: Vec::new(),
            stream: true,
            options: self.options.clone(),
        };
        let deltas = self.post_chat(&body).await?;

        let text = deltas.filter_map(|delta| async move {
            match delta {
                Ok(d) if d.content.is_empty() => None,
                Ok(d) => Some(Ok(d.content)),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(text))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
