use std::path::{Path, PathBuf};

use anyhow::Result;

/// Source of installable Node.js distributions.
///
/// Implementations do not retry; errors reach the caller unchanged.
pub trait Downloader: Send + Sync {
    /// Every installable version, newest first.
    fn list_available_versions(&self) -> Result<Vec<String>>;

    /// Download and unpack `version` somewhere below `target_parent` and
    /// return the path of the installed `node` binary.
    fn fetch(&self, version: &str, target_parent: &Path) -> Result<PathBuf>;

    /// The directory that holds the whole installation `binary` belongs to.
    fn locate_installation_root(&self, binary: &Path) -> Option<PathBuf>;

    /// The `node` binary inside an installation directory.
    fn locate_binary_in_installation(&self, dir: &Path) -> Option<PathBuf>;
}
