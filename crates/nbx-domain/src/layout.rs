use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Reserved name of the single-line file recording the installed version.
pub const INTEGRITY_MARKER_FILE: &str = ".installer_integrity";
/// Module-storage subdirectory that receives the auxiliary packages.
pub const MODULES_DIR: &str = "node_modules";

/// Paths that make up one bundled runtime install target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstallLayout {
    target: PathBuf,
}

impl InstallLayout {
    #[must_use]
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        marker_path(&self.target)
    }

    #[must_use]
    pub fn modules_dir(&self) -> PathBuf {
        self.target.join(MODULES_DIR)
    }

    #[must_use]
    pub fn package_dir(&self, package: &str) -> PathBuf {
        self.modules_dir().join(package)
    }

    /// Lock file keyed by the target; lives beside the target because the
    /// target itself may be replaced by a directory move during install.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(
            self.target
                .file_name()
                .unwrap_or_else(|| self.target.as_os_str()),
        );
        name.push(".lock");
        match self.target.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }
}

#[must_use]
pub fn marker_path(target: &Path) -> PathBuf {
    target.join(INTEGRITY_MARKER_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_hang_off_the_target() {
        let layout = InstallLayout::new("/opt/nbx/nodejs");
        assert_eq!(
            layout.marker_path(),
            PathBuf::from("/opt/nbx/nodejs/.installer_integrity")
        );
        assert_eq!(
            layout.package_dir("typescript"),
            PathBuf::from("/opt/nbx/nodejs/node_modules/typescript")
        );
        assert_eq!(layout.lock_path(), PathBuf::from("/opt/nbx/.nodejs.lock"));
    }

    #[test]
    fn layout_serializes_target() {
        let layout = InstallLayout::new("/tmp/bundle");
        let value = serde_json::to_value(&layout).unwrap();
        assert_eq!(value["target"], "/tmp/bundle");
    }
}
