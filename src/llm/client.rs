//! LLM client trait and provider implementations.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::types::{LlmRequest, ModelSpec, Provider, TokenUsage};

/// Raw provider completion, before dispatcher bookkeeping.
#[derive(Debug, Clone)]
pub struct ProviderCompletion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub latency_ms: u64,
}

/// One LLM provider adapter.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: &LlmRequest) -> Result<ProviderCompletion>;

    /// Which provider this client talks to.
    fn provider(&self) -> Provider;

    /// Models hosted by this provider.
    fn models(&self) -> Vec<ModelSpec>;

    /// Whether this provider hosts the given model.
    fn hosts_model(&self, model: &str) -> bool {
        self.models().iter().any(|m| m.id == model)
    }

    /// Default model used when the caller does not pin one.
    fn default_model(&self) -> String;
}

/// Configuration for provider clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Classify a provider HTTP failure.
fn status_error(provider: Provider, status: reqwest::StatusCode, body: &str) -> Error {
    let message = body.chars().take(500).collect::<String>();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        Error::Auth(format!("{provider} rejected credentials: {message}"))
    } else if status.as_u16() == 429 || status.is_server_error() {
        Error::llm_api(provider.to_string(), format!("{status}: {message}"))
    } else {
        Error::LlmRejected {
            provider: provider.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &LlmRequest) -> Result<ProviderCompletion> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| self.default_model());

        let api_request = AnthropicRequest {
            model: model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            system: request.system.clone(),
            temperature: request.temperature_band.temperature(),
        };

        let url = format!("{}/v1/messages", self.base_url());
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api("anthropic", format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(Provider::Anthropic, status, &body));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_api("anthropic", format!("failed to parse response: {e}")))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_ref())
            .cloned()
            .collect::<Vec<_>>()
            .join("");

        Ok(ProviderCompletion {
            content,
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
            model: api_response.model,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn models(&self) -> Vec<ModelSpec> {
        vec![ModelSpec::claude_sonnet(), ModelSpec::claude_haiku()]
    }

    fn default_model(&self) -> String {
        ModelSpec::claude_sonnet().id
    }
}

/// OpenAI client.
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: OpenAIUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: &LlmRequest) -> Result<ProviderCompletion> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| self.default_model());

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let api_request = OpenAIRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature_band.temperature(),
        };

        let url = format!("{}/v1/chat/completions", self.base_url());
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::llm_api("openai", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm_api("openai", format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(status_error(Provider::OpenAI, status, &body));
        }

        let api_response: OpenAIResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm_api("openai", format!("failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm_api("openai", "no choices in response"))?;

        Ok(ProviderCompletion {
            content: choice.message.content,
            usage: TokenUsage {
                input_tokens: api_response.usage.prompt_tokens,
                output_tokens: api_response.usage.completion_tokens,
            },
            model: api_response.model,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn models(&self) -> Vec<ModelSpec> {
        vec![ModelSpec::gpt4o(), ModelSpec::gpt4o_mini()]
    }

    fn default_model(&self) -> String {
        ModelSpec::gpt4o().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://custom.api.com")
            .with_default_model("claude-3-5-haiku-20241022")
            .with_timeout(60);

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url.as_deref(), Some("https://custom.api.com"));
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_status_classification() {
        let auth = status_error(Provider::Anthropic, reqwest::StatusCode::UNAUTHORIZED, "no");
        assert!(matches!(auth, Error::Auth(_)));
        assert!(!auth.is_recoverable());

        let throttled =
            status_error(Provider::Anthropic, reqwest::StatusCode::TOO_MANY_REQUESTS, "slow");
        assert!(throttled.is_recoverable());

        let server = status_error(Provider::OpenAI, reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(server.is_recoverable());

        let bad_request =
            status_error(Provider::OpenAI, reqwest::StatusCode::BAD_REQUEST, "nope");
        assert!(matches!(bad_request, Error::LlmRejected { .. }));
        assert!(!bad_request.is_recoverable());
    }

    #[test]
    fn test_hosts_model() {
        let client = AnthropicClient::new(ClientConfig::new("test")).unwrap();
        assert!(client.hosts_model("claude-3-5-sonnet-20241022"));
        assert!(!client.hosts_model("gpt-4o"));
    }
}
