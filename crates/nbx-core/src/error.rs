use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures raised while validating a runtime or running one of its tools.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("node runtime at {} is not valid", path.display())]
    InvalidEnvironment { path: PathBuf },
    #[error("tool `{tool}` not found at {}", path.display())]
    Resolution { tool: String, path: PathBuf },
    #[error("failed to determine the version of {}: {reason}", path.display())]
    Version { path: PathBuf, reason: String },
    #[error("failed to start {}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("interrupted while waiting for {}", program.display())]
    Interrupted {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {}", program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} {}", program.display(), describe_exit(*code))]
    ExitStatus {
        program: PathBuf,
        code: Option<i32>,
        stdout: String,
    },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "did not exit before its timeout".to_string(),
    }
}

/// Failures raised by an install run, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("another install is already running for {}", target.display())]
    Busy { target: PathBuf },
    #[error("failed to lock {}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare {}", path.display())]
    Layout {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("failed to download node {version}")]
    Download {
        version: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to record the installed version in {}", target.display())]
    Integrity {
        target: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("failed to update the configured runtime path")]
    Settings {
        #[source]
        source: BoxError,
    },
    #[error("no node runtime found in {}", target.display())]
    MissingRuntime { target: PathBuf },
    #[error("failed to create {}", path.display())]
    Modules {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install package `{package}`")]
    Package {
        package: String,
        #[source]
        source: RuntimeError,
    },
}

impl InstallError {
    /// Short machine-readable label used in command output.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            InstallError::Busy { .. } => "install_busy",
            InstallError::Lock { .. } => "install_lock",
            InstallError::Layout { .. } => "install_layout",
            InstallError::Download { .. } => "download_failed",
            InstallError::Integrity { .. } => "integrity_write_failed",
            InstallError::Settings { .. } => "settings_write_failed",
            InstallError::MissingRuntime { .. } => "missing_runtime",
            InstallError::Modules { .. } => "modules_dir_failed",
            InstallError::Package { .. } => "package_failed",
        }
    }
}
