//! Exponential backoff retry logic for HTTP providers.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Defaults: 3 attempts in total, waits doubling from 1s up to 30s.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// How many times to call a backend and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Defaults overridden by `max_attempts`, `initial_backoff_ms` and
    /// `max_backoff_ms` provider parameters.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let defaults = Self::default();
        let max_attempts = config
            .param_u64("max_attempts")
            .map_or(defaults.max_attempts, |n| n.clamp(1, 10) as u32);
        let initial_interval = config
            .param_u64("initial_backoff_ms")
            .map_or(defaults.initial_interval, Duration::from_millis);
        let max_interval = config
            .param_u64("max_backoff_ms")
            .map_or(defaults.max_interval, Duration::from_millis)
            .max(initial_interval);

        Self {
            max_attempts,
            initial_interval,
            max_interval,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            // Deterministic, monotonically growing delays.
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// `attempt` is called up to `policy.max_attempts` times. Only errors for
/// which [`ProviderError::is_retryable`] holds trigger another attempt; any
/// other error, or the last retryable one, is returned unchanged. A
/// retry-after hint stretches the next delay (up to `max_interval`), and
/// delays never shrink from one attempt to the next.
pub async fn retry_with_backoff<T, Fut, F>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut backoff = policy.backoff();
    let mut previous_wait = Duration::ZERO;
    let mut attempts = 0;

    loop {
        attempts += 1;

        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempts >= policy.max_attempts {
            return Err(err);
        }

        let computed = backoff.next_backoff().unwrap_or(policy.max_interval);
        let hinted = match err.retry_after() {
            Some(hint) => computed.max(hint.min(policy.max_interval)),
            None => computed,
        };
        let wait = hinted.max(previous_wait);
        previous_wait = wait;

        debug!(
            attempt = attempts,
            wait_ms = wait.as_millis() as u64,
            "Retrying after error: {err}"
        );
        tokio::time::sleep(wait).await;
    }
}
