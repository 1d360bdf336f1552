//! Error types for lazygit-llm modules using thiserror.
//!
//! Display strings only ever carry safe metadata (provider name, status
//! code, exit code, elapsed time). Backend bodies, stderr and prompts are
//! never formatted into an error.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while constructing or running a provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(
        "Unsupported provider '{name}'. Available providers: {}",
        .available.join(", ")
    )]
    UnsupportedProvider {
        name: String,
        available: Vec<String>,
    },

    #[error("Diff is empty; stage some changes before generating a message")]
    EmptyInput,

    #[error("{provider} authentication failed: {reason}")]
    Authentication {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} rate limit exceeded{}", format_retry_after(.retry_after))]
    RateLimited {
        provider: &'static str,
        retry_after: Option<Duration>,
    },

    #[error("{provider} is temporarily unavailable: {reason}")]
    Transient {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} timed out after {}s", .timeout.as_secs())]
    Timeout {
        provider: &'static str,
        timeout: Duration,
    },

    #[error("{provider} CLI is not available: {reason}")]
    BinaryUnavailable {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} returned an unusable response: {reason}")]
    Response {
        provider: &'static str,
        reason: String,
    },
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {}s)", wait.as_secs()),
        None => String::new(),
    }
}

impl ProviderError {
    /// Only throttling and backend-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Transient { .. }
        )
    }

    /// Server-provided wait hint, if the backend sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Provider the error originated from, when known.
    pub fn provider(&self) -> Option<&'static str> {
        match self {
            ProviderError::Authentication { provider, .. }
            | ProviderError::RateLimited { provider, .. }
            | ProviderError::Transient { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::BinaryUnavailable { provider, .. }
            | ProviderError::Response { provider, .. } => Some(*provider),
            ProviderError::Config(_)
            | ProviderError::UnsupportedProvider { .. }
            | ProviderError::EmptyInput => None,
        }
    }

    /// True for errors caused by the local setup rather than the backend.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ProviderError::Config(_) | ProviderError::UnsupportedProvider { .. }
        )
    }
}

/// Errors from commit message normalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Generated message is empty")]
    Empty,

    #[error("Generated message contains a disallowed control character (U+{code:04X})")]
    ControlCharacter { code: u32 },
}

/// Errors surfaced by the commit message generator.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Setup(ProviderError),

    #[error("{source} (after {:.1}s)", .elapsed.as_secs_f64())]
    Provider {
        provider: &'static str,
        elapsed: Duration,
        #[source]
        source: ProviderError,
    },

    #[error("{0}")]
    Message(#[from] MessageError),
}

impl GenerateError {
    /// The underlying provider error, if generation failed at that stage.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            GenerateError::Setup(err) | GenerateError::Provider { source: err, .. } => Some(err),
            GenerateError::Message(_) => None,
        }
    }
}

/// Errors from loading the YAML configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("Missing required configuration field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors from collecting the staged diff.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to open repository: {0}")]
    OpenRepository(#[source] git2::Error),

    #[error("Failed to compute staged diff: {0}")]
    DiffFailed(#[source] git2::Error),

    #[error("No staged changes found")]
    NoStagedChanges,
}
