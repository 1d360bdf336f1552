//! Gemini through the Google Cloud SDK (`gcloud`).

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use tracing::debug;

use super::binary::{BinarySpec, resolve_binary};
use super::subprocess::{
    Invocation, PROBE_TIMEOUT, classify_failure, log_failure, prepare_stdin, run_sandboxed, safe_env,
};
use super::validate_model;
use crate::api::DEFAULT_TEMPERATURE;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::llm::{Provider, non_empty_text, render_prompt};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_STDOUT_BYTES: usize = 1024 * 1024;

const SPEC: BinarySpec = BinarySpec {
    provider: GeminiCliProvider::NAME,
    allowed_names: &["gcloud"],
    known_paths: &[
        "/usr/bin/gcloud",
        "/usr/local/bin/gcloud",
        "/opt/google-cloud-sdk/bin/gcloud",
        "/snap/bin/gcloud",
    ],
};

const EXTRA_ENV_VARS: &[&str] = &[
    "CLOUDSDK_CONFIG",
    "CLOUDSDK_CORE_PROJECT",
    "CLOUDSDK_PYTHON",
    "GOOGLE_APPLICATION_CREDENTIALS",
];

static PROJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").expect("Invalid regex"));

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+-[a-z]+[0-9]+$").expect("Invalid regex"));

/// Provider that shells out to `gcloud ai generative-models generate-text`.
///
/// The prompt is streamed on stdin (`--prompt-file=-`).
pub struct GeminiCliProvider {
    binary: PathBuf,
    model: String,
    max_tokens: u32,
    temperature: f64,
    project_id: Option<String>,
    location: Option<String>,
    timeout: Duration,
}

impl GeminiCliProvider {
    pub const NAME: &'static str = "gemini-cli";

    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        validate_model(Self::NAME, &config.model)?;

        let project_id = config.param_str("project_id").map(str::to_string);
        if let Some(project) = &project_id
            && !PROJECT_ID.is_match(project)
        {
            return Err(ProviderError::Config(format!("invalid project_id '{project}'")));
        }

        let location = config.param_str("location").map(str::to_string);
        if let Some(loc) = &location
            && !LOCATION.is_match(loc)
        {
            return Err(ProviderError::Config(format!("invalid location '{loc}'")));
        }

        let temperature = config.param_f64("temperature").unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ProviderError::Config("temperature must be between 0 and 2".into()));
        }

        let binary = resolve_binary(&SPEC, config.param_str("cli_path"))?;

        Ok(Self {
            binary,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature,
            project_id,
            location,
            timeout: config.timeout_or(DEFAULT_TIMEOUT, MAX_TIMEOUT),
        })
    }

    fn generate_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "ai".to_string(),
            "generative-models".to_string(),
            "generate-text".to_string(),
            format!("--model={}", self.model),
            format!("--max-output-tokens={}", self.max_tokens),
            format!("--temperature={}", self.temperature),
            "--format=value(predictions[0].content)".to_string(),
            "--prompt-file=-".to_string(),
            "--quiet".to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        if let Some(project) = &self.project_id {
            args.push(format!("--project={project}").into());
        }
        if let Some(location) = &self.location {
            args.push(format!("--region={location}").into());
        }
        args
    }
}

#[async_trait]
impl Provider for GeminiCliProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, diff: &str, prompt_template: &str) -> Result<String, ProviderError> {
        let prompt = render_prompt(diff, prompt_template)?;
        let input = prepare_stdin(Self::NAME, &prompt)?;
        debug!(model = %self.model, prompt_len = input.len(), "Invoking gcloud");

        let output = run_sandboxed(Invocation {
            provider: Self::NAME,
            binary: &self.binary,
            args: self.generate_args(),
            env: safe_env(EXTRA_ENV_VARS),
            stdin: Some(&input),
            timeout: self.timeout,
            stdout_limit: MAX_STDOUT_BYTES,
        })
        .await?;

        if !output.status.success() {
            log_failure(&self.binary, &output);
            return Err(classify_failure(Self::NAME, &output));
        }

        non_empty_text(Self::NAME, output.stdout)
    }

    async fn test_connection(&self) -> Result<bool, ProviderError> {
        super::version_check(Self::NAME, &self.binary, safe_env(EXTRA_ENV_VARS), PROBE_TIMEOUT).await
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}
