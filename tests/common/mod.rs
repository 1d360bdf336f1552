//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use lazygit_llm::{DiffPayload, ProviderConfig};
use tempfile::TempDir;

pub const SAMPLE_DIFF: &str = "diff --git a/src/lib.rs b/src/lib.rs\n\
--- a/src/lib.rs\n\
+++ b/src/lib.rs\n\
@@ -1,2 +1,3 @@\n\
 fn main() {}\n\
+fn added_line() {}\n";

pub fn sample_diff() -> DiffPayload {
    DiffPayload::from_text(SAMPLE_DIFF, 50_000)
}

/// HTTP provider config pointed at a mock server with fast retries.
pub fn http_config(provider: &str, model: &str, api_key: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig::new(provider, model)
        .with_api_key(api_key)
        .with_param("base_url", base_url)
        .with_param("initial_backoff_ms", 10u64)
        .with_param("max_backoff_ms", 20u64)
}

/// CLI provider config pointed at a mock binary.
pub fn cli_config(provider: &str, binary: &Path) -> ProviderConfig {
    ProviderConfig::new(provider, "test-model")
        .with_param("cli_path", binary.to_string_lossy().into_owned())
}

/// Write an executable shell script named `name` into a fresh temp directory.
///
/// The directory is created with owner-only permissions so the binary
/// passes the world-writable checks.
#[cfg(unix)]
pub fn create_mock_binary(name: &str, script_content: &str) -> (TempDir, PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    fs::set_permissions(temp_dir.path(), fs::Permissions::from_mode(0o700))
        .expect("Failed to set directory permissions");

    let script_path = temp_dir.path().join(name);
    let mut file = File::create(&script_path).expect("Failed to create mock script");
    file.write_all(script_content.as_bytes())
        .expect("Failed to write mock script");
    file.sync_all().expect("Failed to flush mock script");
    drop(file);

    let mut perms = fs::metadata(&script_path)
        .expect("Failed to get metadata")
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("Failed to set permissions");

    (temp_dir, script_path)
}

/// Path inside `dir` a mock script can write side effects to.
pub fn marker_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}
