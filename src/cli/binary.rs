//! Allow-listed executable resolution for CLI providers.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ProviderError;

/// Which executables a CLI provider may run and where to look for them.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BinarySpec {
    pub provider: &'static str,
    /// File names accepted for the executable.
    pub allowed_names: &'static [&'static str],
    /// Absolute install locations checked before `PATH`.
    pub known_paths: &'static [&'static str],
}

/// Resolve the executable for `spec`.
///
/// An explicit path (the `cli_path` parameter) is used exclusively when
/// given. Otherwise well-known install locations are tried first, then a
/// `PATH` lookup of each allowed name. Every candidate must pass
/// [`verify_binary`] before it is returned.
pub(crate) fn resolve_binary(
    spec: &BinarySpec,
    explicit: Option<&str>,
) -> Result<PathBuf, ProviderError> {
    if let Some(raw) = explicit {
        let path = PathBuf::from(raw);
        if !path.is_absolute() {
            return Err(unavailable(spec, "cli_path must be an absolute path".into()));
        }
        verify_binary(spec, &path)?;
        debug!(provider = spec.provider, path = %path.display(), "Using configured CLI binary");
        return Ok(path);
    }

    let known = spec.known_paths.iter().map(PathBuf::from);
    let on_path = spec
        .allowed_names
        .iter()
        .filter_map(|name| which::which(name).ok());

    for candidate in known.filter(|p| p.exists()).chain(on_path) {
        match verify_binary(spec, &candidate) {
            Ok(()) => {
                debug!(provider = spec.provider, path = %candidate.display(), "Resolved CLI binary");
                return Ok(candidate);
            }
            Err(e) => warn!(provider = spec.provider, "Skipping CLI candidate: {e}"),
        }
    }

    Err(unavailable(
        spec,
        format!(
            "none of [{}] found in well-known locations or PATH",
            spec.allowed_names.join(", ")
        ),
    ))
}

/// Check that `path` is an allow-listed, executable regular file that
/// nobody else can swap out.
pub(crate) fn verify_binary(spec: &BinarySpec, path: &Path) -> Result<(), ProviderError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if !spec.allowed_names.contains(&file_name) {
        return Err(unavailable(
            spec,
            format!(
                "'{}' is not an allowed executable name (expected one of: {})",
                path.display(),
                spec.allowed_names.join(", ")
            ),
        ));
    }

    let metadata = fs::metadata(path)
        .map_err(|_| unavailable(spec, format!("{} does not exist", path.display())))?;
    if !metadata.is_file() {
        return Err(unavailable(spec, format!("{} is not a regular file", path.display())));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = metadata.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(unavailable(spec, format!("{} is not executable", path.display())));
        }
        if mode & 0o002 != 0 {
            return Err(unavailable(spec, format!("{} is world-writable", path.display())));
        }

        let resolved = fs::canonicalize(path)
            .map_err(|_| unavailable(spec, format!("cannot resolve {}", path.display())))?;
        if let Some(dir) = resolved.parent()
            && let Ok(dir_meta) = fs::metadata(dir)
            && dir_meta.permissions().mode() & 0o002 != 0
        {
            return Err(unavailable(
                spec,
                format!("{} lives in a world-writable directory", path.display()),
            ));
        }
    }

    Ok(())
}

fn unavailable(spec: &BinarySpec, reason: String) -> ProviderError {
    ProviderError::BinaryUnavailable {
        provider: spec.provider,
        reason,
    }
}
