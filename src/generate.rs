//! End-to-end commit message generation: build the configured provider, run
//! it against the staged diff and normalize what comes back.

use std::time::Instant;

use tracing::{debug, info};

use crate::config::{MessageSettings, ProviderConfig};
use crate::error::{GenerateError, ProviderError};
use crate::git::DiffPayload;
use crate::llm::{GenerationResult, ProviderRegistry};
use crate::message::MessageNormalizer;

pub struct CommitMessageGenerator {
    registry: ProviderRegistry,
    normalizer: MessageNormalizer,
}

impl CommitMessageGenerator {
    /// Generator over the built-in backends.
    pub fn new(settings: &MessageSettings) -> Self {
        Self::with_registry(ProviderRegistry::new(), MessageNormalizer::from_settings(settings))
    }

    pub fn with_registry(registry: ProviderRegistry, normalizer: MessageNormalizer) -> Self {
        Self {
            registry,
            normalizer,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Produce a normalized commit message for `diff`.
    ///
    /// The returned [`GenerationResult::text`] is already cleaned and safe
    /// to hand to git.
    pub async fn generate(
        &self,
        config: &ProviderConfig,
        diff: &DiffPayload,
    ) -> Result<GenerationResult, GenerateError> {
        if diff.is_empty() {
            return Err(GenerateError::Setup(ProviderError::EmptyInput));
        }

        let provider = self.registry.create(config).map_err(GenerateError::Setup)?;
        let name = provider.name();

        debug!(
            provider = name,
            model = %config.model,
            diff_bytes = diff.byte_len(),
            files_changed = diff.files_changed,
            truncated = diff.truncated,
            "Generating commit message"
        );

        let started = Instant::now();
        let raw = provider
            .generate(&diff.text, &config.prompt_template)
            .await
            .map_err(|source| GenerateError::Provider {
                provider: name,
                elapsed: started.elapsed(),
                source,
            })?;
        let elapsed = started.elapsed();

        let message = self.normalizer.clean(&raw)?;

        info!(
            provider = name,
            elapsed_ms = elapsed.as_millis() as u64,
            raw_len = raw.chars().count(),
            message_len = message.chars().count(),
            "Generated commit message"
        );

        Ok(GenerationResult {
            text: message,
            provider: name,
            elapsed,
        })
    }

    /// Build the provider and run its connection check.
    pub async fn test_connection(&self, config: &ProviderConfig) -> Result<bool, GenerateError> {
        let provider = self.registry.create(config).map_err(GenerateError::Setup)?;
        let name = provider.name();

        let started = Instant::now();
        let reachable = provider
            .test_connection()
            .await
            .map_err(|source| GenerateError::Provider {
                provider: name,
                elapsed: started.elapsed(),
                source,
            })?;

        debug!(provider = name, reachable, "Connection check finished");
        Ok(reachable)
    }
}
