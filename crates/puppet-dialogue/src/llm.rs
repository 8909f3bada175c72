//! Language model adapters
//!
//! `complete` never fails: transport errors, error statuses and empty choices
//! are logged and surface as an empty reply, which the state machine treats
//! as "no answer".

use crate::config::{LlmConfig, LlmKind};
use crate::error::{Error, Result};
use crate::message::{Message, MessageRole};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Chat completion capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Reply to an ordered message list; empty on failure
    async fn complete(&self, messages: &[Message]) -> String;
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
}

fn read_api_key(env: &str) -> Option<String> {
    let key = std::env::var(env).ok().filter(|k| !k.trim().is_empty());
    if key.is_none() {
        warn!(env = %env, "API key not set - requests are sent unauthenticated");
    }
    key
}

fn reply_or_empty(backend: &str, result: Result<String>) -> String {
    match result {
        Ok(text) => text,
        Err(e) => {
            warn!(backend = %backend, error = %e, "Completion failed");
            String::new()
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client (OpenAI, Ollama, vLLM, ...)
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout_ms: u64,
}

impl OpenAiCompatibleModel {
    /// Build from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        info!(model = %config.model, base_url = %config.base_url, "Chat completion model initialized");
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: read_api_key(&config.api_key_env),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    async fn try_complete(&self, messages: &[Message]) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout_ms))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("Chat completion failed with status {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = text.len(), "Chat completion received");
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn complete(&self, messages: &[Message]) -> String {
        reply_or_empty(self.name(), self.try_complete(messages).await)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a Message>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout_ms: u64,
}

impl AnthropicModel {
    /// Build from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        info!(model = %config.model, base_url = %config.base_url, "Anthropic model initialized");
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: read_api_key(&config.api_key_env),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    async fn try_complete(&self, messages: &[Message]) -> Result<String> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages
                .iter()
                .filter(|m| m.role != MessageRole::System)
                .collect(),
        };

        let mut request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout_ms))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("Messages request failed with status {status}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, messages: &[Message]) -> String {
        reply_or_empty(self.name(), self.try_complete(messages).await)
    }
}

/// Model that returns queued replies and records every request.
///
/// Once the queue is empty every call yields an empty reply.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLanguageModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    latency: Duration,
}

impl ScriptedLanguageModel {
    /// Create with the given replies
    #[must_use]
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    /// Simulated thinking time per call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a reply
    pub fn push(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply.into());
    }

    /// Every message list received so far
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of completion calls made
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message]) -> String {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default()
    }
}

/// Language model variants selectable from configuration
#[derive(Debug, Clone)]
pub enum LlmBackend {
    /// OpenAI-compatible chat completions
    OpenAiCompatible(OpenAiCompatibleModel),
    /// Anthropic Messages API
    Anthropic(AnthropicModel),
    /// Canned replies
    Scripted(ScriptedLanguageModel),
}

impl LlmBackend {
    /// Select the backend named in `config`
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(match config.provider {
            LlmKind::OpenAiCompatible => {
                Self::OpenAiCompatible(OpenAiCompatibleModel::from_config(config)?)
            }
            LlmKind::Anthropic => Self::Anthropic(AnthropicModel::from_config(config)?),
            LlmKind::Scripted => {
                Self::Scripted(ScriptedLanguageModel::new(config.scripted.iter().cloned()))
            }
        })
    }

    fn inner(&self) -> &dyn LanguageModel {
        match self {
            Self::OpenAiCompatible(m) => m,
            Self::Anthropic(m) => m,
            Self::Scripted(m) => m,
        }
    }
}

#[async_trait]
impl LanguageModel for LlmBackend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn complete(&self, messages: &[Message]) -> String {
        self.inner().complete(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_then_empty() {
        let model = ScriptedLanguageModel::new(["[EMOTION:happy] Hi!"]);
        let messages = vec![Message::system("persona"), Message::user("hello")];

        assert_eq!(model.complete(&messages).await, "[EMOTION:happy] Hi!");
        assert_eq!(model.complete(&messages).await, "");
        assert_eq!(model.calls(), 2);
        assert_eq!(model.requests()[0], messages);
    }

    #[test]
    fn test_reply_or_empty_swallows_errors() {
        assert_eq!(reply_or_empty("test", Ok("ok".to_string())), "ok");
        assert_eq!(reply_or_empty("test", Err(Error::Timeout(60_000))), "");
    }

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![Message::system("s"), Message::user("u")];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            max_tokens: 16,
            temperature: 0.5,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 16);
    }

    #[test]
    fn test_chat_response_without_choices() {
        let parsed: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.choices.is_empty());
    }

    #[test]
    fn test_backend_selection() {
        let backend = LlmBackend::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(backend.name(), "scripted");

        let config = LlmConfig {
            provider: LlmKind::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(LlmBackend::from_config(&config).unwrap().name(), "anthropic");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_empty_reply() {
        let config = LlmConfig {
            provider: LlmKind::OpenAiCompatible,
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let model = OpenAiCompatibleModel::from_config(&config).unwrap();
        assert_eq!(model.complete(&[Message::user("hi")]).await, "");
    }
}
