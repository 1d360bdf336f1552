//! lazygit-llm - Generates commit messages for LazyGit from staged changes using an LLM.
//!
//! # Overview
//!
//! The staged diff is rendered into a prompt and sent to one of several
//! interchangeable backends: hosted HTTP APIs (OpenAI, Anthropic, Gemini) or
//! locally installed CLIs (`gcloud`, Claude Code). Whatever the backend
//! returns is normalized into a single safe commit message line.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod generate;
pub mod git;
pub mod llm;
pub mod message;

// Re-export commonly used types
pub use config::{AppConfig, ProviderConfig};
pub use error::{ConfigError, GenerateError, GitError, MessageError, ProviderError};
pub use generate::CommitMessageGenerator;
pub use git::DiffPayload;
pub use llm::{GenerationResult, Provider, ProviderKind, ProviderRegistry};
pub use message::MessageNormalizer;
