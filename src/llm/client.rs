//! HTTP client for OpenAI-compatible chat completion APIs.
//!
//! Works with hosted APIs and with local servers that expose the same
//! `/chat/completions` route (Ollama, llama.cpp, vLLM).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatMessage, CompletionRequest, CompletionResponse, CompletionService, LlmError};

/// Configuration for the completion client.
#[derive(Debug, Clone, Serialize, Deserialize, prefer::FromValue)]
pub struct LlmConfig {
    /// Whether generated descriptions and chat are enabled
    #[serde(default = "default_enabled")]
    #[prefer(default = "true")]
    pub enabled: bool,
    /// API base URL (default: http://localhost:11434/v1)
    #[serde(default = "default_endpoint")]
    #[prefer(default = "http://localhost:11434/v1")]
    pub endpoint: String,
    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    #[prefer(default = "llama3.2")]
    pub model: String,
    /// Bearer token; may also come from TABLEQUERY_API_KEY or OPENAI_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
    /// Optional OpenAI organization header
    #[serde(default)]
    pub organization: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    #[prefer(default = "30")]
    pub timeout_secs: u64,
    /// Default maximum tokens in a response
    #[serde(default = "default_max_tokens")]
    #[prefer(default = "1000")]
    pub max_tokens: u32,
    /// Default temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    #[prefer(default = "0.1")]
    pub temperature: f32,
}

fn default_enabled() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "llama3.2".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            organization: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Whether the endpoint points at this machine.
    pub fn is_local(&self) -> bool {
        url::Url::parse(&self.endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .map(|host| matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]" | "::1"))
            .unwrap_or(false)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

/// OpenAI chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// OpenAI chat completion response body.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion client for OpenAI-compatible endpoints.
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Check if the service answers its model listing.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        match self.authorized(self.client.get(&url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        };
        match &self.config.organization {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        let body = ChatRequest {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        debug!(
            "Requesting completion from {} ({} messages)",
            self.config.model,
            request.messages.len()
        );
        let resp = self
            .authorized(self.client.post(self.config.completions_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_secs)
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, body)));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| LlmError::Api("Empty response content".to_string()))?;

        Ok(CompletionResponse {
            text,
            model: chat.model,
        })
    }
}
