//! Provider registry: maps configured names onto provider constructors.
//!
//! Built-in backends are registered once in [`ProviderRegistry::new`]. A new
//! backend only needs a [`Provider`] implementation and one `register` call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::Provider;
use crate::api::{AnthropicProvider, GeminiApiProvider, OpenAiProvider};
use crate::cli::{ClaudeCodeProvider, GeminiCliProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Boxed constructor stored in the registry.
pub type Constructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> + Send + Sync>;

/// Transport family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Api,
    Cli,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Api => "api",
            ProviderKind::Cli => "cli",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Entry {
    kind: ProviderKind,
    constructor: Constructor,
}

/// Name → constructor table.
pub struct ProviderRegistry {
    entries: BTreeMap<String, Entry>,
    aliases: HashMap<String, String>,
}

impl ProviderRegistry {
    /// Registry with every built-in backend.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(OpenAiProvider::NAME, ProviderKind::Api, |config| {
            Ok(Box::new(OpenAiProvider::new(config)?) as Box<dyn Provider>)
        });
        registry.register(AnthropicProvider::NAME, ProviderKind::Api, |config| {
            Ok(Box::new(AnthropicProvider::new(config)?) as Box<dyn Provider>)
        });
        registry.register(GeminiApiProvider::NAME, ProviderKind::Api, |config| {
            Ok(Box::new(GeminiApiProvider::new(config)?) as Box<dyn Provider>)
        });
        registry.register(GeminiCliProvider::NAME, ProviderKind::Cli, |config| {
            Ok(Box::new(GeminiCliProvider::new(config)?) as Box<dyn Provider>)
        });
        registry.register(ClaudeCodeProvider::NAME, ProviderKind::Cli, |config| {
            Ok(Box::new(ClaudeCodeProvider::new(config)?) as Box<dyn Provider>)
        });

        registry.alias("gemini", GeminiApiProvider::NAME);
        registry.alias("gcloud", GeminiCliProvider::NAME);
        registry.alias("claude", ClaudeCodeProvider::NAME);

        registry
    }

    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: &str, kind: ProviderKind, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        let key = normalize_name(name);
        let entry = Entry {
            kind,
            constructor: Arc::new(constructor),
        };
        if self.entries.insert(key.clone(), entry).is_some() {
            warn!("Replacing registered provider '{key}'");
        }
    }

    /// Make `alias` resolve to the already registered `target`.
    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(normalize_name(alias), normalize_name(target));
    }

    /// Canonical provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Canonical names of one transport family, sorted.
    pub fn names_by_kind(&self, kind: ProviderKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Transport family for a (possibly aliased) name.
    pub fn kind(&self, name: &str) -> Option<ProviderKind> {
        self.lookup(name).map(|(_, entry)| entry.kind)
    }

    /// Build a fully validated provider for `config`.
    ///
    /// Unknown names fail with [`ProviderError::UnsupportedProvider`]. Field
    /// validation runs before the constructor, and constructors only return
    /// complete instances, so an error never leaves a half-built provider.
    pub fn create(&self, config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
        let (name, entry) =
            self.lookup(&config.provider)
                .ok_or_else(|| ProviderError::UnsupportedProvider {
                    name: config.provider.clone(),
                    available: self.names().into_iter().map(String::from).collect(),
                })?;

        config.validate()?;

        debug!(provider = name, kind = %entry.kind, model = %config.model, "Creating provider");
        (entry.constructor)(config)
    }

    fn lookup(&self, name: &str) -> Option<(&str, &Entry)> {
        let key = normalize_name(name);
        let key = self.aliases.get(&key).cloned().unwrap_or(key);
        self.entries
            .get_key_value(&key)
            .map(|(name, entry)| (name.as_str(), entry))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
