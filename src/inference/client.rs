//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to the configured model endpoint. Handles
//! the fallback chain when the active model is unavailable.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::{ModelConfig, ModelsConfig};
use super::errors::InferenceError;
use super::model::ChatModel;
use super::response::parse_completion_response;
use super::tool_call_parser::{failed_tool_call_arguments, repair_malformed_tool_call_json};
use super::types::{ChatCompletionRequest, ChatMessage, ModelReply, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout.
///
/// Local models can take a long time to process a large context before the
/// first token. The orchestrator applies its own, usually tighter, bound.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible chat completion endpoint.
///
/// Sticks to the last model that answered; when it fails with a retriable
/// error the rest of the fallback chain is tried in order.
pub struct InferenceClient {
    http: HttpClient,
    /// The full models configuration (for the fallback chain).
    config: ModelsConfig,
    /// The model key that answered last (e.g., "qwen25-7b").
    current_model_key: Mutex<String>,
}

impl InferenceClient {
    /// Create a new inference client from the models configuration.
    ///
    /// Resolves the active model from config. Does NOT check connectivity;
    /// that happens on the first request.
    pub fn from_config(config: ModelsConfig) -> Result<Self, InferenceError> {
        let (key, model) = super::config::resolve_active_model(&config)?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            current_model_key: Mutex::new(key),
        })
    }

    /// The key of the model that will be tried first.
    pub fn current_model_key(&self) -> String {
        self.current_model_key
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Display name of the model that will be tried first.
    pub fn current_model_name(&self) -> String {
        let key = self.current_model_key();
        self.config
            .models
            .get(&key)
            .map(|m| m.display_name.clone())
            .unwrap_or(key)
    }

    fn set_current_model(&self, key: &str) {
        *self
            .current_model_key
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = key.to_string();
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send a chat completion request, walking the fallback chain.
    ///
    /// When an Ollama-style HTTP 500 reports malformed tool-call JSON, the
    /// arguments are repaired client-side and handed back as an unparsed
    /// tool call instead of falling back.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError> {
        let first = self.current_model_key();
        let mut attempted = Vec::new();

        for key in self.config.candidates(&first) {
            let Some(model) = self.config.models.get(&key) else {
                continue;
            };
            attempted.push(key.clone());

            match self.try_request(&key, model, messages, tools).await {
                Ok(reply) => {
                    if key != first {
                        tracing::info!(from = %first, to = %key, "switched to fallback model");
                        self.set_current_model(&key);
                    }
                    return Ok(reply);
                }
                Err(e) if e.is_tool_call_parse_error() => {
                    if let Some(raw) = Self::try_repair_from_error(&e) {
                        tracing::info!(model = %key, "repaired malformed JSON tool call");
                        return Ok(ModelReply {
                            unparsed_tool_calls: vec![raw],
                            ..ModelReply::default()
                        });
                    }
                    tracing::warn!(model = %key, "tool call JSON repair failed, falling back");
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(model = %key, error = %e, "model unavailable, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(InferenceError::AllModelsUnavailable { attempted })
    }

    /// Attempt a single request to one model.
    async fn try_request(
        &self,
        key: &str,
        model: &ModelConfig,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError> {
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));
        let body = build_request(model, messages, tools);

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            key,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            "=== LLM REQUEST ==="
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(api_key) = model.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: REQUEST_TIMEOUT.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        let reply = parse_completion_response(&body_text)?;
        tracing::info!(
            model = %body.model,
            tool_calls = reply.tool_calls.len(),
            unparsed = reply.unparsed_tool_calls.len(),
            has_content = reply.content.is_some(),
            "=== LLM RESPONSE ==="
        );
        Ok(reply)
    }

    // ─── Tool Call Repair ──────────────────────────────────────────────────

    /// Repaired arguments from an Ollama HTTP 500 error body, re-serialized.
    ///
    /// Ollama's error body doesn't carry the tool name, so the result goes
    /// through best-effort recovery rather than straight to dispatch.
    fn try_repair_from_error(err: &InferenceError) -> Option<String> {
        let body = err.error_body()?;
        let raw_args = failed_tool_call_arguments(body)?;
        let repaired = repair_malformed_tool_call_json(&raw_args)?;
        Some(repaired.to_string())
    }
}

/// Request body for one model.
fn build_request(
    model: &ModelConfig,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
) -> ChatCompletionRequest {
    let tools = tools.filter(|t| !t.is_empty()).map(<[ToolDefinition]>::to_vec);
    ChatCompletionRequest {
        model: model.model_name.clone(),
        messages: messages.to_vec(),
        tool_choice: tools.as_ref().map(|_| "auto".to_string()),
        tools,
        temperature: model.temperature,
        max_tokens: model.max_tokens,
        stream: false,
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError> {
        self.chat_completion(messages, tools).await
    }

    fn name(&self) -> String {
        self.current_model_name()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
