//! CLI providers backed by locally installed tools.

pub(crate) mod binary;
pub mod claude_code;
pub mod gcloud;
pub(crate) mod subprocess;

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;
use subprocess::{Invocation, classify_failure, run_sandboxed};

pub use claude_code::ClaudeCodeProvider;
pub use gcloud::GeminiCliProvider;

/// Model names end up in argv; keep them to a conservative charset and
/// never let them look like a flag.
pub(crate) fn validate_model(provider: &'static str, model: &str) -> Result<(), ProviderError> {
    let valid = !model.starts_with('-')
        && !model.is_empty()
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/' | '@'));
    if valid {
        Ok(())
    } else {
        Err(ProviderError::Config(format!(
            "{provider} model name '{model}' contains unsupported characters"
        )))
    }
}

/// Run `<binary> --version` as a cheap availability check.
pub(crate) async fn version_check(
    provider: &'static str,
    binary: &Path,
    env: Vec<(String, String)>,
    timeout: Duration,
) -> Result<bool, ProviderError> {
    let output = run_sandboxed(Invocation {
        provider,
        binary,
        args: vec!["--version".into()],
        env,
        stdin: None,
        timeout,
        stdout_limit: 64 * 1024,
    })
    .await?;

    if output.status.success() {
        return Ok(true);
    }

    match classify_failure(provider, &output) {
        err @ (ProviderError::Authentication { .. } | ProviderError::BinaryUnavailable { .. }) => {
            Err(err)
        }
        _ => {
            warn!(provider, exit_code = output.status.code(), "Version check failed");
            Ok(false)
        }
    }
}
