use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use nbx_domain::{HostPlatform, ToolReference};
use serde::Serialize;
use tracing::debug;

use crate::error::RuntimeError;
use crate::process::{self, Timeout};

/// Upper bound for the `--version` probe.
pub const VERSION_PROBE_TIMEOUT: Timeout = Timeout::Millis(2000);

/// A `node` binary on disk plus the directory its sibling tools live in.
///
/// Nothing about the binary is cached: every call to [`RuntimeHandle::is_valid`]
/// or [`RuntimeHandle::version`] runs the binary again.
#[derive(Clone, Debug, Serialize)]
pub struct RuntimeHandle {
    binary: PathBuf,
    directory: PathBuf,
}

impl RuntimeHandle {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        let binary = std::path::absolute(&binary).unwrap_or(binary);
        let directory = binary
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self { binary, directory }
    }

    /// A handle for `binary`, but only when it answers `--version`.
    pub fn probe(binary: impl Into<PathBuf>) -> Option<Self> {
        let handle = Self::new(binary);
        handle.is_valid().then_some(handle)
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// # Errors
    /// [`RuntimeError::Resolution`] when the tool is absent on this host.
    pub fn resolve_tool(&self, tool: ToolReference) -> Result<PathBuf, RuntimeError> {
        self.resolve_tool_for(tool, HostPlatform::current())
    }

    /// # Errors
    /// [`RuntimeError::Resolution`] when `tool` has no file for `platform`.
    pub fn resolve_tool_for(
        &self,
        tool: ToolReference,
        platform: HostPlatform,
    ) -> Result<PathBuf, RuntimeError> {
        let path = self.directory.join(tool.file_name(platform));
        if path.exists() {
            Ok(path)
        } else {
            Err(RuntimeError::Resolution {
                tool: tool.to_string(),
                path,
            })
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.version() {
            Ok(_) => true,
            Err(err) => {
                debug!(%err, "runtime failed validation");
                false
            }
        }
    }

    /// Ask the binary for its version and return the last non-empty line.
    ///
    /// # Errors
    /// [`RuntimeError::Version`] when the binary cannot run, is still running
    /// at the probe deadline, or prints nothing.
    pub fn version(&self) -> Result<String, RuntimeError> {
        let failed = |reason: String| RuntimeError::Version {
            path: self.binary.clone(),
            reason,
        };
        let output = process::run_captured(
            &self.binary,
            &["--version".to_string()],
            VERSION_PROBE_TIMEOUT,
        )
        .map_err(|err| failed(err.to_string()))?;
        if output.timed_out() {
            return Err(failed("timed out".to_string()));
        }
        last_line(&output.stdout).ok_or_else(|| failed("empty output".to_string()))
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(ToOwned::to_owned)
}

impl PartialEq for RuntimeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.binary == other.binary
    }
}

impl Eq for RuntimeHandle {}

impl Hash for RuntimeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.binary.hash(state);
    }
}
