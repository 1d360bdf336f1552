//! Claude Code CLI provider.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::binary::{BinarySpec, resolve_binary};
use super::subprocess::{
    Invocation, PROBE_TIMEOUT, classify_failure, log_failure, prepare_stdin, run_sandboxed, safe_env,
};
use super::validate_model;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::llm::{Provider, non_empty_text, render_prompt};

/// Claude Code is heavier to start than gcloud, so it gets more headroom.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_STDOUT_BYTES: usize = 2 * 1024 * 1024;

const SPEC: BinarySpec = BinarySpec {
    provider: ClaudeCodeProvider::NAME,
    allowed_names: &["claude", "claude-code"],
    known_paths: &[
        "/usr/local/bin/claude",
        "/usr/bin/claude",
        "/opt/homebrew/bin/claude",
        "/usr/local/bin/claude-code",
        "/usr/bin/claude-code",
        "/opt/claude-code/bin/claude-code",
    ],
};

const EXTRA_ENV_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "CLAUDE_API_KEY",
    "CLAUDE_CONFIG_DIR",
    "XDG_CONFIG_HOME",
];

/// Provider that runs `claude --print` with the prompt on stdin.
pub struct ClaudeCodeProvider {
    binary: PathBuf,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ClaudeCodeProvider {
    pub const NAME: &'static str = "claude-code";

    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        validate_model(Self::NAME, &config.model)?;
        let binary = resolve_binary(&SPEC, config.param_str("cli_path"))?;

        Ok(Self {
            binary,
            model: config.model.clone(),
            api_key: config.credential().map(str::to_string),
            timeout: config.timeout_or(DEFAULT_TIMEOUT, MAX_TIMEOUT),
        })
    }

    fn generate_args(&self) -> Vec<OsString> {
        ["--print", "--output-format", "text", "--model", self.model.as_str()]
            .into_iter()
            .map(OsString::from)
            .collect()
    }

    fn env(&self) -> Vec<(String, String)> {
        let mut env = safe_env(EXTRA_ENV_VARS);
        if let Some(key) = &self.api_key {
            env.retain(|(name, _)| name != "ANTHROPIC_API_KEY");
            env.push(("ANTHROPIC_API_KEY".to_string(), key.clone()));
        }
        env
    }
}

#[async_trait]
impl Provider for ClaudeCodeProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn generate(&self, diff: &str, prompt_template: &str) -> Result<String, ProviderError> {
        let prompt = render_prompt(diff, prompt_template)?;
        let input = prepare_stdin(Self::NAME, &prompt)?;
        debug!(model = %self.model, prompt_len = input.len(), "Invoking Claude Code");

        let output = run_sandboxed(Invocation {
            provider: Self::NAME,
            binary: &self.binary,
            args: self.generate_args(),
            env: self.env(),
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
        super::version_check(Self::NAME, &self.binary, self.env(), PROBE_TIMEOUT).await
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}
