use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use nbx_domain::layout::marker_path;
use tracing::debug;

/// First line of the marker in `target`, if it can be read.
#[must_use]
pub fn installed_version(target: &Path) -> Option<String> {
    let path = marker_path(target);
    match fs::read_to_string(&path) {
        Ok(contents) => Some(contents.lines().next().unwrap_or_default().to_string()),
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                debug!(path = %path.display(), %err, "integrity marker unreadable");
            }
            None
        }
    }
}

/// `true` only when the marker exists and its first line equals `expected`.
#[must_use]
pub fn check(target: &Path, expected: &str) -> bool {
    installed_version(target).is_some_and(|found| found == expected)
}

/// Replace the marker in `target` with one recording `version`.
///
/// # Errors
/// Returns an error when the old marker cannot be removed or the new one
/// cannot be written.
pub fn update(target: &Path, version: &str) -> Result<()> {
    let path = marker_path(target);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to remove {}", path.display()));
        }
    }
    fs::create_dir_all(target).with_context(|| format!("failed to create {}", target.display()))?;
    fs::write(&path, version).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), version, "integrity marker written");
    Ok(())
}
