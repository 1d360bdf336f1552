//! Anthropic messages API backend.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DEFAULT_TEMPERATURE, HttpBackend, auth_headers, base_url, require_credential};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::llm::{Provider, non_empty_text, render_prompt};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Provider for the Anthropic `/v1/messages` endpoint.
pub struct AnthropicProvider {
    http: HttpBackend,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    top_p: Option<f64>,
}

impl AnthropicProvider {
    pub const NAME: &'static str = "anthropic";

    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = require_credential(Self::NAME, config, "sk-ant-")?;
        let mut headers = auth_headers(Self::NAME, HeaderName::from_static("x-api-key"), api_key)?;
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(API_VERSION),
        );

        Ok(Self {
            http: HttpBackend::new(Self::NAME, config, headers)?,
            base_url: base_url(Self::NAME, config, DEFAULT_BASE_URL)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.param_f64("temperature").unwrap_or(DEFAULT_TEMPERATURE),
            top_p: config.param_f64("top_p"),
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, diff: &str, prompt_template: &str) -> Result<String, ProviderError> {
        let prompt = render_prompt(diff, prompt_template)?;
        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting Anthropic message");

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: [Message {
                role: "user",
                content: &prompt,
            }],
            temperature: self.temperature,
            top_p: self.top_p,
        };

        let response: MessagesResponse = self
            .http
            .post_json(&format!("{}/v1/messages", self.base_url), &request)
            .await?;

        let text = response
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| ProviderError::Response {
                provider: Self::NAME,
                reason: "no text block in response".into(),
            })?;

        non_empty_text(Self::NAME, text)
    }

    async fn test_connection(&self) -> Result<bool, ProviderError> {
        self.http.probe(&format!("{}/v1/models", self.base_url)).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}
