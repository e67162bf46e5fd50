use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Remove `path` whether it is a file or a directory tree; absent paths are fine.
///
/// On unix a denied removal grants owner write access across the tree and
/// retries once.
pub(crate) fn remove_tree(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    if !meta.is_dir() {
        return fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()));
    }
    let removed = match fs::remove_dir_all(path) {
        #[cfg(unix)]
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            debug!(path = %path.display(), "granting owner write access before removal");
            grant_owner_write(path);
            fs::remove_dir_all(path)
        }
        other => other,
    };
    removed.with_context(|| format!("failed to remove {}", path.display()))
}

#[cfg(unix)]
fn grant_owner_write(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mode = meta.permissions().mode();
    let wanted = if meta.is_dir() { mode | 0o700 } else { mode | 0o200 };
    if wanted != mode {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(wanted));
    }
    if meta.is_dir() {
        for entry in fs::read_dir(path).into_iter().flatten().flatten() {
            grant_owner_write(&entry.path());
        }
    }
}

/// Move the directory `from` to `to` with a single rename, replacing an
/// existing directory at `to`.
///
/// Returns `false` (after logging) instead of failing; a displaced `to` is
/// restored when the rename does not go through.
pub fn atomic_move(from: &Path, to: &Path) -> bool {
    if let Some(parent) = to.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), %err, "cannot create move destination parent");
            return false;
        }
    }
    let displaced = if to.is_dir() {
        let aside = sibling_path(to, "old");
        if let Err(err) = fs::rename(to, &aside) {
            warn!(path = %to.display(), %err, "cannot move existing directory aside");
            return false;
        }
        Some(aside)
    } else {
        None
    };

    match fs::rename(from, to) {
        Ok(()) => {
            debug!(from = %from.display(), to = %to.display(), "moved installation");
            if let Some(aside) = displaced {
                if let Err(err) = remove_tree(&aside) {
                    warn!(path = %aside.display(), %err, "failed to remove replaced directory");
                }
            }
            true
        }
        Err(err) => {
            warn!(from = %from.display(), to = %to.display(), %err, "move failed");
            if let Some(aside) = displaced {
                if let Err(err) = fs::rename(&aside, to) {
                    warn!(path = %to.display(), %err, "failed to restore replaced directory");
                }
            }
            false
        }
    }
}

fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sibling = format!(".{name}.{tag}-{}", std::process::id());
    match path.parent() {
        Some(parent) => parent.join(sibling),
        None => PathBuf::from(sibling),
    }
}

/// Scratch directory created next to its final destination so the last step
/// of an install is a same-filesystem rename.
pub(crate) struct StagingDir {
    inner: Option<tempfile::TempDir>,
    path: PathBuf,
}

pub(crate) const STAGING_PREFIX: &str = ".nbx-stage-";

impl StagingDir {
    pub(crate) fn new_in(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
        prune_stale_staging(root, Duration::from_secs(24 * 60 * 60));
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("failed to create staging directory under {}", root.display()))?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            inner: Some(dir),
            path,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let Some(dir) = self.inner.take() else {
            return;
        };
        let path = dir.keep();
        let _ = remove_tree(&path);
    }
}

fn prune_stale_staging(root: &Path, max_age: Duration) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(STAGING_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Some(modified) = meta.modified().ok() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }
        let _ = remove_tree(&entry.path());
    }
}
