//! HTTP providers backed by JSON REST APIs.
//!
//! [`HttpBackend`] holds the request plumbing the three backends share:
//! client construction with a hard deadline, status-code classification,
//! retry with backoff, and typed response decoding.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::llm::retry::{RetryPolicy, retry_with_backoff};

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiApiProvider;
pub use openai::OpenAiProvider;

/// Request deadline when the config does not set one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for any configured request deadline.
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default sampling temperature for commit messages.
pub(crate) const DEFAULT_TEMPERATURE: f64 = 0.3;

/// Shared HTTP client state for one provider instance.
pub(crate) struct HttpBackend {
    provider: &'static str,
    client: Client,
    headers: HeaderMap,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpBackend {
    pub(crate) fn new(
        provider: &'static str,
        config: &ProviderConfig,
        headers: HeaderMap,
    ) -> Result<Self, ProviderError> {
        let timeout = config.timeout_or(DEFAULT_TIMEOUT, MAX_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .user_agent(concat!("lazygit-llm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            client,
            headers,
            timeout,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// POST `body` and decode the success payload as `R`, retrying
    /// throttling and 5xx responses.
    pub(crate) async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        retry_with_backoff(&self.retry, || self.post_once(url, body)).await
    }

    async fn post_once<B, R>(&self, url: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        debug!(
            provider = self.provider,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HTTP response received"
        );

        if !status.is_success() {
            return Err(classify_status(self.provider, status, response.headers()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?;
        serde_json::from_slice(&bytes).map_err(|_| ProviderError::Response {
            provider: self.provider,
            reason: "response body does not match the expected schema".into(),
        })
    }

    /// Single GET used for connection checks.
    ///
    /// Rejected credentials are an error; any other non-success status is
    /// reported as `Ok(false)`.
    pub(crate) async fn probe(&self, url: &str) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        match classify_status(self.provider, status, response.headers()) {
            err @ ProviderError::Authentication { .. } => Err(err),
            _ => {
                warn!(
                    provider = self.provider,
                    status = status.as_u16(),
                    "Connection check returned a non-success status"
                );
                Ok(false)
            }
        }
    }

    fn transport_error(&self, err: &reqwest::Error) -> ProviderError {
        if err.is_builder() {
            ProviderError::Config(format!("{} request could not be built", self.provider))
        } else if err.is_timeout() {
            ProviderError::Timeout {
                provider: self.provider,
                timeout: self.timeout,
            }
        } else if err.is_connect() {
            ProviderError::Transient {
                provider: self.provider,
                reason: "connection failed".into(),
            }
        } else if err.is_decode() || err.is_body() {
            ProviderError::Transient {
                provider: self.provider,
                reason: "response body was interrupted".into(),
            }
        } else {
            ProviderError::Transient {
                provider: self.provider,
                reason: "request failed".into(),
            }
        }
    }
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn classify_status(
    provider: &'static str,
    status: StatusCode,
    headers: &HeaderMap,
) -> ProviderError {
    let reason = format!("HTTP {}", status.as_u16());
    match status.as_u16() {
        401 | 403 => ProviderError::Authentication { provider, reason },
        429 => ProviderError::RateLimited {
            provider,
            retry_after: parse_retry_after(headers),
        },
        500..=599 => ProviderError::Transient { provider, reason },
        _ => ProviderError::Response { provider, reason },
    }
}

/// Read `retry-after-ms` or `retry-after` (delta seconds).
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    if let Some(ms) = header_str("retry-after-ms").and_then(|v| v.parse::<f64>().ok())
        && ms.is_finite()
        && ms >= 0.0
    {
        return Some(Duration::from_millis(ms as u64));
    }

    header_str(RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The credential from `config`, or a config error naming the provider.
///
/// A key that does not look like the backend's usual format only logs a
/// warning, since proxies and gateways issue their own keys.
pub(crate) fn require_credential<'a>(
    provider: &'static str,
    config: &'a ProviderConfig,
    expected_prefix: &str,
) -> Result<&'a str, ProviderError> {
    let key = config.credential().ok_or_else(|| {
        ProviderError::Config(format!("{provider} requires a non-empty api_key"))
    })?;

    if !key.starts_with(expected_prefix) {
        warn!(provider, "API key does not start with the usual '{expected_prefix}' prefix");
    }
    Ok(key)
}

/// Header value for a secret, marked sensitive so it is never printed.
pub(crate) fn secret_header(
    provider: &'static str,
    value: &str,
) -> Result<HeaderValue, ProviderError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        ProviderError::Config(format!(
            "{provider} api_key contains characters not allowed in an HTTP header"
        ))
    })?;
    header.set_sensitive(true);
    Ok(header)
}

/// Header map with a single secret entry.
pub(crate) fn auth_headers(
    provider: &'static str,
    name: HeaderName,
    value: &str,
) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(name, secret_header(provider, value)?);
    Ok(headers)
}

/// `base_url` parameter or `default`, without a trailing slash.
///
/// Anything that is not an absolute http(s) URL is a config error.
pub(crate) fn base_url(
    provider: &'static str,
    config: &ProviderConfig,
    default: &str,
) -> Result<String, ProviderError> {
    let raw = config.param_str("base_url").unwrap_or(default).trim();
    let parsed = Url::parse(raw)
        .map_err(|e| ProviderError::Config(format!("{provider} base_url '{raw}' is invalid: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ProviderError::Config(format!(
            "{provider} base_url '{raw}' must be an http or https URL"
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}
