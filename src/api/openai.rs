//! OpenAI chat completions backend.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DEFAULT_TEMPERATURE, HttpBackend, auth_headers, base_url, require_credential};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::llm::{Provider, non_empty_text, render_prompt};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Provider for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiProvider {
    http: HttpBackend,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    top_p: Option<f64>,
}

impl OpenAiProvider {
    pub const NAME: &'static str = "openai";

    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = require_credential(Self::NAME, config, "sk-")?;
        let headers = auth_headers(Self::NAME, AUTHORIZATION, &format!("Bearer {api_key}"))?;

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
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, diff: &str, prompt_template: &str) -> Result<String, ProviderError> {
        let prompt = render_prompt(diff, prompt_template)?;
        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting OpenAI completion");

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        };

        let response: ChatResponse = self
            .http
            .post_json(&format!("{}/chat/completions", self.base_url), &request)
            .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Response {
                provider: Self::NAME,
                reason: "no completion choices in response".into(),
            })?;

        non_empty_text(Self::NAME, text)
    }

    async fn test_connection(&self) -> Result<bool, ProviderError> {
        self.http.probe(&format!("{}/models", self.base_url)).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest {
            model: "gpt-4",
            messages: [ChatMessage {
                role: "user",
                content: "Summarize: +x",
            }],
            max_tokens: 100,
            temperature: 0.3,
            top_p: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "Summarize: +x");
        assert_eq!(value["max_tokens"], 100);
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn test_response_without_content_decodes() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(response.choices[0].message.content.is_none());
    }

    #[test]
    fn test_new_requires_api_key() {
        let config = ProviderConfig::new("openai", "gpt-4");
        assert!(matches!(
            OpenAiProvider::new(&config),
            Err(ProviderError::Config(_))
        ));
    }
}
