//! Google Gemini `generateContent` backend.

use async_trait::async_trait;
use reqwest::header::HeaderName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{DEFAULT_TEMPERATURE, HttpBackend, auth_headers, base_url, require_credential};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::llm::{Provider, non_empty_text, render_prompt};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TOP_K: u64 = 32;
const MAX_CANDIDATES: u64 = 8;

pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub const BLOCK_THRESHOLDS: [&str; 4] = [
    "BLOCK_NONE",
    "BLOCK_LOW_AND_ABOVE",
    "BLOCK_MEDIUM_AND_ABOVE",
    "BLOCK_ONLY_HIGH",
];

const DEFAULT_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

/// One entry of the `safetySettings` request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    top_k: u64,
    candidate_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Provider for the Gemini API (`models/{model}:generateContent`).
pub struct GeminiApiProvider {
    http: HttpBackend,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    top_p: Option<f64>,
    top_k: u64,
    candidate_count: u64,
    safety_settings: Vec<SafetySetting>,
}

impl GeminiApiProvider {
    pub const NAME: &'static str = "gemini-api";

    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = require_credential(Self::NAME, config, "AIza")?;
        let headers = auth_headers(Self::NAME, HeaderName::from_static("x-goog-api-key"), api_key)?;

        let candidate_count = config.param_u64("candidate_count").unwrap_or(1);
        if !(1..=MAX_CANDIDATES).contains(&candidate_count) {
            return Err(ProviderError::Config(format!(
                "candidate_count must be between 1 and {MAX_CANDIDATES}"
            )));
        }

        Ok(Self {
            http: HttpBackend::new(Self::NAME, config, headers)?,
            base_url: base_url(Self::NAME, config, DEFAULT_BASE_URL)?,
            model: model_id(&config.model)?,
            max_tokens: config.max_tokens,
            temperature: config.param_f64("temperature").unwrap_or(DEFAULT_TEMPERATURE),
            top_p: config.param_f64("top_p"),
            top_k: config.param_u64("top_k").unwrap_or(DEFAULT_TOP_K),
            candidate_count,
            safety_settings: safety_settings(config.params.get("safety_settings"))?,
        })
    }
}

/// Model id as a single URL path segment, with an optional `models/`
/// prefix removed.
fn model_id(model: &str) -> Result<String, ProviderError> {
    let id = model.strip_prefix("models/").unwrap_or(model);
    let valid = !id.is_empty()
        && !id.starts_with(['-', '.'])
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(id.to_string())
    } else {
        Err(ProviderError::Config(format!(
            "gemini-api model name '{model}' contains unsupported characters"
        )))
    }
}

/// Parse the `safety_settings` parameter.
///
/// Accepts a list of `{category, threshold}` objects or a single threshold
/// string applied to every harm category. Absent means the default
/// threshold for every category.
pub fn safety_settings(param: Option<&Value>) -> Result<Vec<SafetySetting>, ProviderError> {
    let settings = match param {
        None | Some(Value::Null) => uniform_settings(DEFAULT_THRESHOLD),
        Some(Value::String(threshold)) => uniform_settings(threshold),
        Some(value) if value.is_array() => serde_json::from_value::<Vec<SafetySetting>>(value.clone())
            .map_err(|_| {
                ProviderError::Config(
                    "safety_settings entries must be objects with category and threshold".into(),
                )
            })?,
        Some(_) => {
            return Err(ProviderError::Config(
                "safety_settings must be a list or a threshold string".into(),
            ));
        }
    };

    for setting in &settings {
        if !HARM_CATEGORIES.contains(&setting.category.as_str()) {
            return Err(ProviderError::Config(format!(
                "unknown safety category '{}'",
                setting.category
            )));
        }
        if !BLOCK_THRESHOLDS.contains(&setting.threshold.as_str()) {
            return Err(ProviderError::Config(format!(
                "unknown safety threshold '{}'",
                setting.threshold
            )));
        }
    }
    Ok(settings)
}

fn uniform_settings(threshold: &str) -> Vec<SafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: (*category).to_string(),
            threshold: threshold.to_string(),
        })
        .collect()
}

#[async_trait]
impl Provider for GeminiApiProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, diff: &str, prompt_template: &str) -> Result<String, ProviderError> {
        let prompt = render_prompt(diff, prompt_template)?;
        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting Gemini content");

        let request = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                candidate_count: self.candidate_count,
            },
            safety_settings: &self.safety_settings,
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response: GenerateResponse = self.http.post_json(&url, &request).await?;

        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = match response.prompt_feedback.and_then(|f| f.block_reason) {
                Some(block) => format!("prompt blocked by safety filters ({block})"),
                None => "no candidates in response".to_string(),
            };
            return Err(ProviderError::Response {
                provider: Self::NAME,
                reason,
            });
        };

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        non_empty_text(Self::NAME, text)
    }

    async fn test_connection(&self) -> Result<bool, ProviderError> {
        self.http.probe(&format!("{}/models", self.base_url)).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}
