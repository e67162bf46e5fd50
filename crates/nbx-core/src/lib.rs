#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod commands;
pub mod config;
mod context;
pub mod downloader;
mod effects;
pub mod error;
pub mod executor;
mod fs;
pub mod integrity;
mod lock;
mod net;
pub mod node_dist;
pub mod orchestrator;
mod outcome;
pub mod process;
pub mod progress;
pub mod runtime;
pub mod settings;

#[cfg(all(test, unix))]
mod test_support;

pub(crate) const NBX_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use nbx_domain::{AuxiliaryPackageSet, ToolReference};

pub use crate::commands::{
    format_status_message, node_exec, node_info, node_install, node_use, node_versions,
    select_runtime, to_json_response, NodeExecRequest, NodeInstallRequest, NodeUseRequest,
    NodeVersionsRequest, RuntimeSource, SelectedRuntime,
};
pub use crate::config::{Config, GlobalOptions};
pub use crate::context::{CommandContext, CommandGroup, CommandInfo};
pub use crate::downloader::Downloader;
pub use crate::effects::{Effects, SharedEffects, SystemEffects};
pub use crate::error::{InstallError, RuntimeError};
pub use crate::executor::{ArgumentStyle, Executor};
pub use crate::orchestrator::{InstallEffects, InstallOrchestrator, InstallReport, InstallRequest};
pub use crate::outcome::{CommandStatus, ExecutionOutcome, InstallUserError};
pub use crate::process::Timeout;
pub use crate::progress::{NoProgress, Progress, TerminalProgress};
pub use crate::runtime::RuntimeHandle;
pub use crate::settings::{FileSettings, MemorySettings, Settings};

/// Version string reported by `nbx --version` and the HTTP user agent.
#[must_use]
pub fn version() -> &'static str {
    NBX_VERSION
}
