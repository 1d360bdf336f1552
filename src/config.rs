//! Provider configuration and YAML config file loading.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{ConfigError, ProviderError};

/// The only substitution token recognized in prompt templates.
pub const DIFF_PLACEHOLDER: &str = "{diff}";

/// Template used when the config file does not provide one.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Write a single-line conventional commit message \
(type: summary, under 72 characters) for the following staged changes. \
Reply with the commit message only.\n\n{diff}";

/// Default output token budget.
pub const DEFAULT_MAX_TOKENS: u32 = 100;

/// Default bound for the normalized message length.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 72;

/// Default cap on diff text handed to a provider.
pub const DEFAULT_MAX_DIFF_BYTES: usize = 50_000;

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").expect("Invalid regex")
});

/// Immutable settings for one provider invocation.
///
/// Built once from the resolved config file (or directly by callers) and
/// handed by reference to the registry and provider constructors.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Registry name, e.g. `openai` or `claude-code`.
    pub provider: String,
    pub model: String,
    /// Resolved credential. Required by HTTP providers.
    pub api_key: Option<String>,
    /// Hard deadline per call. `None` uses the provider default.
    pub timeout: Option<Duration>,
    pub max_tokens: u32,
    /// Must contain exactly one `{diff}` placeholder.
    pub prompt_template: String,
    /// Provider-specific parameters (temperature, base_url, cli_path, ...).
    pub params: HashMap<String, Value>,
}

impl ProviderConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            timeout: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            params: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Check the fields every provider relies on.
    ///
    /// Runs before any provider is constructed so a bad template or budget
    /// never reaches the network or a subprocess.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.provider.trim().is_empty() {
            return Err(ProviderError::Config("provider name is empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ProviderError::Config("model name is empty".into()));
        }
        if self.max_tokens == 0 {
            return Err(ProviderError::Config("max_tokens must be positive".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ProviderError::Config("timeout must be positive".into()));
        }

        match self.prompt_template.matches(DIFF_PLACEHOLDER).count() {
            1 => Ok(()),
            0 => Err(ProviderError::Config(format!(
                "prompt template must contain the {DIFF_PLACEHOLDER} placeholder"
            ))),
            n => Err(ProviderError::Config(format!(
                "prompt template must contain exactly one {DIFF_PLACEHOLDER} placeholder, found {n}"
            ))),
        }
    }

    /// Configured timeout, or `default` when unset. Never exceeds `ceiling`.
    pub fn timeout_or(&self, default: Duration, ceiling: Duration) -> Duration {
        self.timeout.unwrap_or(default).min(ceiling)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// The credential if it is present and non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .field("prompt_template_len", &self.prompt_template.len())
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Normalizer settings from the `message` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    pub max_length: usize,
    pub multiline: bool,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_MESSAGE_LENGTH,
            multiline: false,
        }
    }
}

/// Diff collection settings from the `git` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub max_diff_bytes: usize,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            max_diff_bytes: DEFAULT_MAX_DIFF_BYTES,
        }
    }
}

/// Fully resolved contents of the config file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub message: MessageSettings,
    pub git: GitSettings,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    provider: Option<String>,
    model_name: Option<String>,
    api_key: Option<String>,
    timeout: Option<u64>,
    max_tokens: Option<u32>,
    prompt_template: Option<String>,
    #[serde(default)]
    additional_params: HashMap<String, Value>,
    #[serde(default)]
    message: MessageSettings,
    #[serde(default)]
    git: GitSettings,
}

impl AppConfig {
    /// Load and resolve a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_yaml_str(&text)
    }

    /// Parse YAML text, expanding `${VAR}` / `${VAR:default}` references in
    /// every string value before interpreting it.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let mut document: serde_yaml::Value = serde_yaml::from_str(text).map_err(ConfigError::Parse)?;
        expand_env_in_value(&mut document);
        let raw: RawConfig = serde_yaml::from_value(document).map_err(ConfigError::Parse)?;

        let provider = raw
            .provider
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingField("provider"))?;
        let model = raw
            .model_name
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::MissingField("model_name"))?;

        let timeout = match raw.timeout {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "timeout",
                    reason: "must be a positive number of seconds".into(),
                });
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        if raw.max_tokens == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_tokens",
                reason: "must be positive".into(),
            });
        }

        let api_key = raw.api_key.and_then(|key| {
            if key.contains("${") {
                warn!("api_key references an unset environment variable; ignoring it");
                None
            } else {
                Some(key)
            }
        });

        Ok(Self {
            provider: ProviderConfig {
                provider,
                model,
                api_key,
                timeout,
                max_tokens: raw.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                prompt_template: raw
                    .prompt_template
                    .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
                params: raw.additional_params,
            },
            message: raw.message,
            git: raw.git,
        })
    }
}

/// Expand environment references in a single string.
///
/// An unset variable without a default is left untouched.
pub fn expand_env(text: &str) -> String {
    ENV_REF
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => caps[0].to_string(),
                },
            }
        })
        .into_owned()
}

fn expand_env_in_value(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) => *s = expand_env(s),
        serde_yaml::Value::Sequence(items) => items.iter_mut().for_each(expand_env_in_value),
        serde_yaml::Value::Mapping(map) => map.iter_mut().for_each(|(_, v)| expand_env_in_value(v)),
        serde_yaml::Value::Tagged(tagged) => expand_env_in_value(&mut tagged.value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ProviderConfig {
        ProviderConfig::new("openai", "gpt-4")
            .with_api_key("sk-test")
            .with_prompt_template("Summarize: {diff}")
    }

    #[test]
    fn test_validate_accepts_single_placeholder() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_placeholder() {
        let config = valid().with_prompt_template("Summarize the changes");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ProviderError::Config(ref m) if m.contains("{diff}")));
    }

    #[test]
    fn test_validate_rejects_duplicate_placeholder() {
        let config = valid().with_prompt_template("{diff} and again {diff}");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ProviderError::Config(ref m) if m.contains("found 2")));
    }

    #[test]
    fn test_validate_rejects_zero_budget_and_timeout() {
        assert!(valid().with_max_tokens(0).validate().is_err());
        assert!(valid().with_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_model() {
        let config = ProviderConfig::new("openai", "  ").with_prompt_template("{diff}");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", valid().with_api_key("sk-very-secret"));
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_timeout_or_clamps_to_ceiling() {
        let config = valid().with_timeout(Duration::from_secs(900));
        assert_eq!(
            config.timeout_or(Duration::from_secs(30), Duration::from_secs(300)),
            Duration::from_secs(300)
        );
        let config = valid();
        assert_eq!(
            config.timeout_or(Duration::from_secs(30), Duration::from_secs(300)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_param_accessors() {
        let config = valid()
            .with_param("temperature", 0.3)
            .with_param("base_url", "http://localhost:9")
            .with_param("top_k", 32);
        assert_eq!(config.param_f64("temperature"), Some(0.3));
        assert_eq!(config.param_str("base_url"), Some("http://localhost:9"));
        assert_eq!(config.param_u64("top_k"), Some(32));
        assert_eq!(config.param_str("missing"), None);
    }

    #[test]
    fn test_expand_env_with_value_default_and_unset() {
        temp_env::with_vars(
            [("LGLLM_TEST_SET", Some("abc")), ("LGLLM_TEST_UNSET", None::<&str>)],
            || {
                assert_eq!(expand_env("key=${LGLLM_TEST_SET}"), "key=abc");
                assert_eq!(expand_env("${LGLLM_TEST_UNSET:fallback}"), "fallback");
                assert_eq!(expand_env("${LGLLM_TEST_UNSET}"), "${LGLLM_TEST_UNSET}");
                assert_eq!(expand_env("{diff} stays"), "{diff} stays");
            },
        );
    }

    #[test]
    fn test_load_yaml_with_env_expansion() {
        let yaml = r#"
provider: openai
model_name: gpt-4
api_key: ${LGLLM_TEST_KEY}
timeout: 5
prompt_template: "Summarize: {diff}"
additional_params:
  temperature: 0.2
  base_url: ${LGLLM_TEST_URL:https://api.openai.com/v1}
message:
  max_length: 50
"#;
        temp_env::with_vars(
            [("LGLLM_TEST_KEY", Some("sk-from-env")), ("LGLLM_TEST_URL", None)],
            || {
                let config = AppConfig::from_yaml_str(yaml).unwrap();
                assert_eq!(config.provider.provider, "openai");
                assert_eq!(config.provider.api_key.as_deref(), Some("sk-from-env"));
                assert_eq!(config.provider.timeout, Some(Duration::from_secs(5)));
                assert_eq!(config.provider.max_tokens, DEFAULT_MAX_TOKENS);
                assert_eq!(
                    config.provider.param_str("base_url"),
                    Some("https://api.openai.com/v1")
                );
                assert_eq!(config.message.max_length, 50);
                assert!(!config.message.multiline);
                assert_eq!(config.git.max_diff_bytes, DEFAULT_MAX_DIFF_BYTES);
            },
        );
    }

    #[test]
    fn test_load_yaml_drops_unresolved_api_key() {
        let yaml = "provider: anthropic\nmodel_name: claude\napi_key: ${LGLLM_TEST_NOPE}\n";
        temp_env::with_var_unset("LGLLM_TEST_NOPE", || {
            let config = AppConfig::from_yaml_str(yaml).unwrap();
            assert!(config.provider.api_key.is_none());
            assert_eq!(config.provider.prompt_template, DEFAULT_PROMPT_TEMPLATE);
        });
    }

    #[test]
    fn test_load_yaml_missing_provider() {
        let err = AppConfig::from_yaml_str("model_name: gpt-4\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("provider")));
    }

    #[test]
    fn test_load_yaml_rejects_zero_timeout() {
        let err = AppConfig::from_yaml_str("provider: openai\nmodel_name: gpt-4\ntimeout: 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "timeout", .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/definitely/not/here.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_default_template_is_valid() {
        let config = ProviderConfig::new("openai", "gpt-4");
        assert!(config.validate().is_ok());
    }
}
