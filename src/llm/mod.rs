//! The provider contract shared by every backend.
//!
//! A [`Provider`] turns a staged diff plus a prompt template into raw model
//! text. Concrete backends live in [`crate::api`] (HTTP) and [`crate::cli`]
//! (subprocess); the [`registry`] maps configured names onto them.

pub mod prompt;
pub mod registry;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use prompt::render_prompt;
pub use registry::{ProviderKind, ProviderRegistry};
pub use retry::RetryPolicy;

/// A backend able to produce a commit message from a diff.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Canonical registry name of this backend.
    fn name(&self) -> &'static str;

    /// Render `prompt_template` with `diff` and return the backend's raw text.
    ///
    /// Returns [`ProviderError::EmptyInput`] for a blank diff before any
    /// request or subprocess is started. On success the text is non-empty.
    async fn generate(&self, diff: &str, prompt_template: &str) -> Result<String, ProviderError>;

    /// Cheap reachability and credential check that does not generate text.
    async fn test_connection(&self) -> Result<bool, ProviderError>;

    /// Whether the backend can deliver tokens incrementally.
    fn supports_streaming(&self) -> bool;
}

/// Raw backend output plus where and how fast it came back.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub provider: &'static str,
    pub elapsed: Duration,
}

/// Reject blank completions so callers never see `Ok("")`.
pub(crate) fn non_empty_text(provider: &'static str, text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::Response {
            provider,
            reason: "backend returned empty text".into(),
        });
    }
    Ok(text)
}
