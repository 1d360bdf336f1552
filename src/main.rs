//! lazygit-llm - CLI entry point.
//!
//! Prints the generated commit message on stdout and nothing else; all
//! diagnostics go to stderr.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use lazygit_llm::git::{open_repository, read_staged_diff};
use lazygit_llm::{
    AppConfig, CommitMessageGenerator, ConfigError, DiffPayload, GenerateError, GitError,
    ProviderKind, ProviderRegistry,
};

const CONFIG_ENV: &str = "LAZYGIT_LLM_CONFIG";

/// Generate a commit message for the staged changes using an LLM.
#[derive(Parser, Debug)]
#[command(name = "lazygit-llm")]
#[command(about = "Generate a commit message for staged changes using an LLM")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Check the configuration and provider connection, then exit
    #[arg(long)]
    test_config: bool,

    /// List the available provider names and exit
    #[arg(long)]
    list_providers: bool,
}

enum Outcome {
    Success,
    Failure,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tokio::select! {
        result = run(cli) => match result {
            Ok(Outcome::Success) => ExitCode::SUCCESS,
            Ok(Outcome::Failure) => ExitCode::from(1),
            Err(err) => {
                eprintln!("Error: {err:#}");
                exit_code_for(&err)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            ExitCode::from(130)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<Outcome> {
    if cli.list_providers {
        print_providers(&ProviderRegistry::new());
        return Ok(Outcome::Success);
    }

    // Step 1: Load configuration
    let config_path = resolve_config_path(cli.config)?;
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let generator = CommitMessageGenerator::new(&config.message);

    // Step 2: Connection check mode
    if cli.test_config {
        let reachable = generator
            .test_connection(&config.provider)
            .await
            .context("Configuration test failed")?;
        return Ok(if reachable {
            println!("Configuration OK: {} is reachable", config.provider.provider);
            Outcome::Success
        } else {
            println!("Could not reach {}", config.provider.provider);
            Outcome::Failure
        });
    }

    // Step 3: Collect the diff
    let diff = match collect_diff(config.git.max_diff_bytes).await {
        Ok(diff) => diff,
        Err(err) if matches!(err.downcast_ref::<GitError>(), Some(GitError::NoStagedChanges)) => {
            eprintln!("No staged files found");
            return Ok(Outcome::Success);
        }
        Err(err) => return Err(err),
    };

    if diff.truncated {
        tracing::warn!(bytes = diff.byte_len(), "Diff truncated to fit the size limit");
    }

    // Step 4: Generate and print
    let result = generator
        .generate(&config.provider, &diff)
        .await
        .context("Failed to generate commit message")?;

    println!("{}", result.text);
    Ok(Outcome::Success)
}

/// `--config`, then `$LAZYGIT_LLM_CONFIG`, then the per-user config file.
fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok_or_else(|| ConfigError::NotFound("no --config given and HOME is not set".into()))?;

    Ok(base.join("lazygit-llm").join("config.yml"))
}

/// Piped input wins; an interactive terminal falls back to the git index.
async fn collect_diff(max_bytes: usize) -> Result<DiffPayload> {
    if !std::io::stdin().is_terminal() {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read diff from stdin")?;
        if !text.trim().is_empty() {
            return Ok(DiffPayload::from_text(&text, max_bytes));
        }
    }

    let repo = open_repository().context("Not a git repository")?;
    let diff = read_staged_diff(&repo, max_bytes)?;
    Ok(diff)
}

fn print_providers(registry: &ProviderRegistry) {
    for kind in [ProviderKind::Api, ProviderKind::Cli] {
        for name in registry.names_by_kind(kind) {
            println!("{name} ({kind})");
        }
    }
}

/// 2 for configuration and usage problems, 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    let is_setup = err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<GitError>(), Some(GitError::OpenRepository(_)))
        || matches!(
            err.downcast_ref::<GenerateError>(),
            Some(GenerateError::Setup(source)) if source.is_config_error()
        );

    if is_setup {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}
