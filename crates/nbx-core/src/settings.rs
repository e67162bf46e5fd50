//! Where the configured runtime path lives between runs.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::runtime::RuntimeHandle;

pub trait Settings: Send + Sync {
    fn runtime_path(&self) -> Option<String>;

    /// # Errors
    /// Returns an error when the value cannot be persisted.
    fn set_runtime_path(&self, path: &str) -> Result<()>;

    /// The configured path is non-empty, exists and answers `--version`.
    fn is_path_valid(&self) -> bool {
        let Some(path) = self.runtime_path() else {
            return false;
        };
        if path.trim().is_empty() || !Path::new(&path).exists() {
            return false;
        }
        RuntimeHandle::probe(path).is_some()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime_path: Option<String>,
}

/// JSON document on disk, rewritten through a temp file and rename.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SettingsFile> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid settings file at {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SettingsFile::default()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        }
    }

    fn save(&self, contents: &SettingsFile) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        let json = serde_json::to_vec_pretty(contents)?;
        temp.write_all(&json)?;
        temp.write_all(b"\n")?;
        temp.persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

impl Settings for FileSettings {
    fn runtime_path(&self) -> Option<String> {
        match self.load() {
            Ok(contents) => contents.runtime_path,
            Err(err) => {
                debug!(%err, "ignoring unreadable settings");
                None
            }
        }
    }

    fn set_runtime_path(&self, path: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut contents = self.load().unwrap_or_default();
        contents.runtime_path = Some(path.to_string());
        self.save(&contents)?;
        debug!(settings = %self.path.display(), runtime = path, "runtime path updated");
        Ok(())
    }
}

/// In-process settings for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemorySettings {
    runtime_path: Mutex<Option<String>>,
}

impl MemorySettings {
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            runtime_path: Mutex::new(Some(path.into())),
        }
    }
}

impl Settings for MemorySettings {
    fn runtime_path(&self) -> Option<String> {
        self.runtime_path
            .lock()
            .map(|value| value.clone())
            .unwrap_or_default()
    }

    fn set_runtime_path(&self, path: &str) -> Result<()> {
        let mut value = self
            .runtime_path
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        *value = Some(path.to_string());
        Ok(())
    }
}
