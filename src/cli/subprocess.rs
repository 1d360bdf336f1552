//! Sandboxed CLI spawning.
//!
//! Every CLI provider call goes through [`run_sandboxed`]: argument-list
//! execution (no shell), a cleared environment with an explicit allow-list,
//! the prompt on stdin, capped output capture, and a hard deadline after
//! which the child is killed and reaped.
//!
//! On unix the child leads its own process group. The whole group is
//! killed once the leader exits or the deadline passes, so helpers a tool
//! forks cannot outlive the call or hold its output pipes open.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex_lite::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Variables every CLI tool may see when present in the parent environment.
const BASE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TMPDIR"];

/// Largest prompt accepted on stdin.
pub(crate) const MAX_PROMPT_BYTES: usize = 100_000;

/// Cap on captured stderr for every tool.
pub(crate) const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// Deadline for `--version` style connection checks.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(unauthori[sz]ed|unauthenticated|(re)?authentication (failed|required|error)|not logged in|(run|please) \S*( auth)? ?/?log ?in|invalid (api[ _-]?key|credentials?|token)|(api[ _-]?key|credentials?) (is |are )?(missing|invalid|expired|not (set|found)))\b",
    )
    .expect("Invalid regex")
});

static RATE_LIMITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(rate[ _-]?limit|quota|resource[ _]exhausted|too many requests|\b429\b)")
        .expect("Invalid regex")
});

/// One subprocess call.
pub(crate) struct Invocation<'a> {
    pub provider: &'static str,
    pub binary: &'a Path,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
    pub stdout_limit: usize,
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub(crate) struct CliOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn into_text(self, stream: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(&format!("\n... ({stream} truncated due to size limit)"));
        }
        text
    }
}

/// Environment for a tool: the base allow-list plus `extra` names that are
/// set in the parent, and `NO_COLOR=1`.
pub(crate) fn safe_env(extra: &[&str]) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = BASE_ENV_VARS
        .iter()
        .chain(extra)
        .filter_map(|name| env::var(name).ok().map(|value| ((*name).to_string(), value)))
        .collect();
    vars.push(("NO_COLOR".to_string(), "1".to_string()));
    vars
}

/// Prompt bytes for stdin with NUL bytes removed and the size bounded.
pub(crate) fn prepare_stdin(provider: &'static str, prompt: &str) -> Result<Vec<u8>, ProviderError> {
    let cleaned: Vec<u8> = prompt.bytes().filter(|b| *b != 0).collect();
    if cleaned.len() > MAX_PROMPT_BYTES {
        return Err(ProviderError::Config(format!(
            "{provider} prompt is {} bytes, above the {MAX_PROMPT_BYTES} byte limit; lower git.max_diff_bytes",
            cleaned.len()
        )));
    }
    Ok(cleaned)
}

/// Process group led by a spawned CLI.
///
/// Signalled at most once. Dropping a group that was never signalled
/// kills it.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn led_by(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            let Ok(raw) = i32::try_from(pgid) else {
                return;
            };
            match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid, "Failed to kill CLI process group: {e}"),
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `invocation` to completion or until its deadline.
///
/// On timeout the process group is killed and the child waited for before
/// returning [`ProviderError::Timeout`], so no zombie is left behind.
pub(crate) async fn run_sandboxed(invocation: Invocation<'_>) -> Result<CliOutput, ProviderError> {
    let provider = invocation.provider;
    let binary_name = display_name(invocation.binary);

    let mut command = Command::new(invocation.binary);
    command
        .args(&invocation.args)
        .env_clear()
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| ProviderError::BinaryUnavailable {
        provider,
        reason: format!("failed to start {binary_name}: {}", e.kind()),
    })?;
    let mut group = ProcessGroup::led_by(&child);

    let outcome = timeout(
        invocation.timeout,
        communicate(
            &mut child,
            &mut group,
            invocation.stdin,
            invocation.stdout_limit,
        ),
    )
    .await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok((status, stdout, stderr))) => {
            debug!(
                binary = %binary_name,
                exit_code = status.code(),
                elapsed_ms = elapsed.as_millis() as u64,
                stdout_len = stdout.len(),
                "CLI finished"
            );
            Ok(CliOutput {
                status,
                stdout,
                stderr,
                elapsed,
            })
        }
        Ok(Err(e)) => {
            group.kill();
            reap(&mut child, &binary_name).await;
            Err(ProviderError::Response {
                provider,
                reason: format!("I/O error talking to {binary_name}: {}", e.kind()),
            })
        }
        Err(_) => {
            group.kill();
            reap(&mut child, &binary_name).await;
            warn!(
                binary = %binary_name,
                timeout_secs = invocation.timeout.as_secs(),
                "CLI killed after exceeding its deadline"
            );
            Err(ProviderError::Timeout {
                provider,
                timeout: invocation.timeout,
            })
        }
    }
}

/// Kill the child and wait for it so it does not linger as a zombie.
async fn reap(child: &mut Child, binary_name: &str) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(binary = %binary_name, "Failed to kill CLI process: {}", e.kind());
    }
}

async fn communicate(
    child: &mut Child,
    group: &mut ProcessGroup,
    input: Option<&[u8]>,
    stdout_limit: usize,
) -> io::Result<(ExitStatus, String, String)> {
    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr was not captured"))?;

    let write = async move {
        if let (Some(mut pipe), Some(bytes)) = (stdin, input) {
            match pipe.write_all(bytes).await {
                // The tool may exit without reading all of its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }
        Ok::<_, io::Error>(())
    };

    let wait = async {
        let status = child.wait().await;
        // Background helpers may still hold stdout or stderr open.
        group.kill();
        status
    };

    let (written, out, err, status) = tokio::join!(
        write,
        read_capped(stdout, stdout_limit),
        read_capped(stderr, MAX_STDERR_BYTES),
        wait
    );
    let status = status?;
    written?;
    let (out, err) = (out?, err?);
    Ok((status, out.into_text("stdout"), err.into_text("stderr")))
}

/// Read the stream to the end, keeping at most `limit` bytes.
///
/// Excess output is drained and discarded so the child never blocks on a
/// full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(bytes.len());
        bytes.extend_from_slice(&chunk[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }

    Ok(Captured { bytes, truncated })
}

/// Map a non-zero exit onto the error taxonomy.
///
/// Only the exit code and a fixed description end up in the error; stderr
/// is inspected for keywords but never copied.
pub(crate) fn classify_failure(provider: &'static str, output: &CliOutput) -> ProviderError {
    let Some(code) = output.status.code() else {
        return ProviderError::Response {
            provider,
            reason: "CLI was terminated by a signal".into(),
        };
    };

    match code {
        126 => ProviderError::BinaryUnavailable {
            provider,
            reason: "CLI could not be executed (exit code 126)".into(),
        },
        127 => ProviderError::BinaryUnavailable {
            provider,
            reason: "CLI or one of its dependencies was not found (exit code 127)".into(),
        },
        _ if RATE_LIMITED.is_match(&output.stderr) => ProviderError::RateLimited {
            provider,
            retry_after: None,
        },
        _ if AUTH_FAILURE.is_match(&output.stderr) => ProviderError::Authentication {
            provider,
            reason: format!("CLI reported missing or invalid credentials (exit code {code})"),
        },
        _ => ProviderError::Response {
            provider,
            reason: format!("CLI exited with code {code}"),
        },
    }
}

/// Log a failed run with safe metadata only.
pub(crate) fn log_failure(binary: &Path, output: &CliOutput) {
    warn!(
        binary = %display_name(binary),
        exit_code = output.status.code(),
        elapsed_ms = output.elapsed.as_millis() as u64,
        "CLI exited with failure"
    );
}

fn display_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}
