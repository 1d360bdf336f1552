//! Integration tests for the CLI backends.
//!
//! These tests install shell scripts named like the real tools (`claude`,
//! `gcloud`) into private temp directories and point `cli_path` at them, so
//! the full spawn, stdin, timeout and classification path runs for real.
//!
//! Scripts locate their side-effect files with `dirname "$0"` because the
//! child environment is cleared.
#![cfg(unix)]

mod common;

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serial_test::serial;

use common::{SAMPLE_DIFF, cli_config, create_mock_binary, marker_path, sample_diff};
use lazygit_llm::config::MessageSettings;
use lazygit_llm::{CommitMessageGenerator, ProviderError, ProviderRegistry};

const TEMPLATE: &str = "Summarize: {diff}";

/// Whether `pid` is a live, non-zombie process.
fn process_is_running(pid: &str) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state field follows the parenthesized command name.
    let state = stat
        .rsplit(')')
        .next()
        .and_then(|rest| rest.split_whitespace().next());
    !matches!(state, None | Some("Z") | Some("X"))
}

/// Poll until `pid` is gone, giving the kernel a moment to deliver signals.
async fn wait_for_exit(pid: &str) -> bool {
    for _ in 0..40 {
        if !process_is_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
#[serial]
async fn test_prompt_is_sent_on_stdin_not_argv() {
    let (dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
DIR=$(dirname "$0")
cat > "$DIR/stdin.txt"
printf '%s\n' "$@" > "$DIR/args.txt"
echo "feat: add line from claude"
"#,
    );

    let config = cli_config("claude-code", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    let text = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap();
    assert_eq!(text.trim(), "feat: add line from claude");

    let stdin = fs::read_to_string(marker_path(&dir, "stdin.txt")).unwrap();
    assert_eq!(stdin, format!("Summarize: {SAMPLE_DIFF}"));

    let args = fs::read_to_string(marker_path(&dir, "args.txt")).unwrap();
    assert_eq!(args, "--print\n--output-format\ntext\n--model\ntest-model\n");
    assert!(!args.contains("added_line"));
}

#[test]
#[serial]
fn test_child_environment_is_minimal() {
    let (dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
env > "$(dirname "$0")/env.txt"
echo "chore: env"
"#,
    );

    temp_env::with_var("LAZYGIT_LLM_TEST_SECRET", Some("do-not-leak"), || {
        tokio_test::block_on(async {
            let config = cli_config("claude", &binary);
            let provider = ProviderRegistry::new().create(&config).unwrap();
            provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap();
        });
    });

    let env = fs::read_to_string(marker_path(&dir, "env.txt")).unwrap();
    assert!(env.lines().any(|line| line == "NO_COLOR=1"));
    assert!(!env.contains("LAZYGIT_LLM_TEST_SECRET"));
    assert!(!env.contains("do-not-leak"));
}

#[tokio::test]
#[serial]
async fn test_timeout_kills_and_reaps_child() {
    let (dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
echo $$ > "$(dirname "$0")/pid"
exec sleep 30
"#,
    );

    let config = cli_config("claude-code", &binary).with_timeout(Duration::from_secs(1));
    let provider = ProviderRegistry::new().create(&config).unwrap();

    let started = Instant::now();
    let err = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(
        err,
        ProviderError::Timeout {
            provider: "claude-code",
            ..
        }
    ));

    let pid = fs::read_to_string(marker_path(&dir, "pid")).unwrap();
    let proc_entry = format!("/proc/{}", pid.trim());
    assert!(
        !Path::new(&proc_entry).exists(),
        "child process {} is still present after timeout",
        pid.trim()
    );
}

#[tokio::test]
#[serial]
async fn test_timeout_kills_background_helpers() {
    let (dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
sleep 30 &
echo $! > "$(dirname "$0")/helper_pid"
wait
"#,
    );

    let config = cli_config("claude-code", &binary).with_timeout(Duration::from_secs(1));
    let provider = ProviderRegistry::new().create(&config).unwrap();

    let started = Instant::now();
    let err = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(err, ProviderError::Timeout { .. }));

    let pid = fs::read_to_string(marker_path(&dir, "helper_pid")).unwrap();
    assert!(
        wait_for_exit(pid.trim()).await,
        "background helper {} survived the timeout",
        pid.trim()
    );
}

#[tokio::test]
#[serial]
async fn test_helper_holding_stdout_does_not_stall_success() {
    let (dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
cat > /dev/null
sleep 30 &
echo $! > "$(dirname "$0")/helper_pid"
echo "feat: finish before helper"
"#,
    );

    let config = cli_config("claude-code", &binary).with_timeout(Duration::from_secs(10));
    let provider = ProviderRegistry::new().create(&config).unwrap();

    let started = Instant::now();
    let text = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap();
    assert_eq!(text.trim(), "feat: finish before helper");
    assert!(started.elapsed() < Duration::from_secs(5));

    let pid = fs::read_to_string(marker_path(&dir, "helper_pid")).unwrap();
    assert!(
        wait_for_exit(pid.trim()).await,
        "background helper {} outlived the CLI",
        pid.trim()
    );
}

#[tokio::test]
#[serial]
async fn test_missing_binary_is_unavailable() {
    let config = cli_config("claude-code", Path::new("/nonexistent/bin/claude"));
    let err = ProviderRegistry::new().create(&config).err().unwrap();
    assert!(matches!(err, ProviderError::BinaryUnavailable { .. }));
}

#[tokio::test]
#[serial]
async fn test_unexpected_binary_name_is_rejected() {
    let (_dir, binary) = create_mock_binary("not-claude.sh", "#!/bin/sh\necho ok\n");
    let config = cli_config("claude-code", &binary);
    let err = ProviderRegistry::new().create(&config).err().unwrap();
    assert!(matches!(err, ProviderError::BinaryUnavailable { .. }));
}

#[tokio::test]
#[serial]
async fn test_auth_failure_on_stderr() {
    let (_dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
cat > /dev/null
echo "Error: Invalid API key sk-ant-secret. Please run /login" >&2
exit 1
"#,
    );

    let config = cli_config("claude-code", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    let err = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap_err();

    assert!(matches!(err, ProviderError::Authentication { .. }));
    assert!(!err.to_string().contains("sk-ant-secret"));
}

#[tokio::test]
#[serial]
async fn test_generic_failure_reports_exit_code() {
    let (_dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
cat > /dev/null
echo "something broke" >&2
exit 3
"#,
    );

    let config = cli_config("claude-code", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    let err = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap_err();

    assert!(matches!(err, ProviderError::Response { .. }));
    assert!(err.to_string().contains("code 3"));
}

#[tokio::test]
#[serial]
async fn test_oversized_output_is_truncated() {
    let (_dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
cat > /dev/null
head -c 3000000 /dev/zero | tr '\0' 'a'
"#,
    );

    let config = cli_config("claude-code", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    let text = provider.generate(SAMPLE_DIFF, TEMPLATE).await.unwrap();

    assert!(text.len() < 3_000_000);
    assert!(text.ends_with("(stdout truncated due to size limit)"));
}

#[tokio::test]
#[serial]
async fn test_empty_diff_never_spawns() {
    let (dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
touch "$(dirname "$0")/spawned"
echo "feat: should not run"
"#,
    );

    let config = cli_config("claude-code", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    let err = provider.generate("  \n\t", TEMPLATE).await.unwrap_err();

    assert!(matches!(err, ProviderError::EmptyInput));
    assert!(!marker_path(&dir, "spawned").exists());
}

#[tokio::test]
#[serial]
async fn test_version_probe() {
    let (_dir, binary) = create_mock_binary(
        "claude",
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "1.0.0 (Claude Code)"
  exit 0
fi
exit 1
"#,
    );

    let config = cli_config("claude-code", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    assert!(provider.test_connection().await.unwrap());
    assert!(!provider.supports_streaming());
}

#[tokio::test]
#[serial]
async fn test_version_probe_failure_is_unreachable() {
    let (_dir, binary) = create_mock_binary("gcloud", "#!/bin/sh\nexit 2\n");

    let config = cli_config("gemini-cli", &binary);
    let provider = ProviderRegistry::new().create(&config).unwrap();
    assert!(!provider.test_connection().await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_gcloud_reads_prompt_file_from_stdin() {
    let (dir, binary) = create_mock_binary(
        "gcloud",
        r#"#!/bin/sh
DIR=$(dirname "$0")
cat > "$DIR/stdin.txt"
printf '%s\n' "$@" > "$DIR/args.txt"
echo "fix: handle empty input"
"#,
    );

    let config = cli_config("gcloud", &binary)
        .with_param("project_id", "my-project-1")
        .with_param("location", "us-central1");

    let generator = CommitMessageGenerator::new(&MessageSettings::default());
    let result = generator.generate(&config, &sample_diff()).await.unwrap();
    assert_eq!(result.text, "fix: handle empty input");
    assert_eq!(result.provider, "gemini-cli");

    let stdin = fs::read_to_string(marker_path(&dir, "stdin.txt")).unwrap();
    assert!(stdin.contains("+fn added_line() {}"));

    let args = fs::read_to_string(marker_path(&dir, "args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(&args[..3], ["ai", "generative-models", "generate-text"]);
    assert!(args.contains(&"--prompt-file=-"));
    assert!(args.contains(&"--project=my-project-1"));
    assert!(args.contains(&"--region=us-central1"));
    assert!(!args.iter().any(|arg| arg.contains("added_line")));
}
