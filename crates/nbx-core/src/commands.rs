use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use nbx_domain::ToolReference;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::context::{CommandContext, CommandInfo};
use crate::error::{InstallError, RuntimeError};
use crate::integrity;
use crate::orchestrator::{InstallOrchestrator, InstallRequest};
use crate::outcome::{CommandStatus, ExecutionOutcome, InstallUserError};
use crate::process::Timeout;
use crate::progress::{NoProgress, Progress, TerminalProgress};
use crate::runtime::RuntimeHandle;

#[derive(Debug, Clone, Default)]
pub struct NodeInstallRequest {
    pub refresh_packages: bool,
}

#[derive(Debug, Clone)]
pub struct NodeExecRequest {
    pub tool: ToolReference,
    /// Negative waits for the child to exit.
    pub timeout_ms: i64,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeVersionsRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct NodeUseRequest {
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSource {
    Configured,
    Bundled,
}

#[derive(Clone, Debug)]
pub struct SelectedRuntime {
    pub handle: RuntimeHandle,
    pub source: RuntimeSource,
}

/// The configured runtime when it works, else the bundled one when it works.
pub fn select_runtime(ctx: &CommandContext) -> Option<SelectedRuntime> {
    let settings = ctx.effects().settings();
    if settings.is_path_valid() {
        if let Some(path) = settings.runtime_path() {
            return Some(SelectedRuntime {
                handle: RuntimeHandle::new(path),
                source: RuntimeSource::Configured,
            });
        }
    }
    let target = ctx.config().bundled_target();
    debug!(path = %target.display(), "configured runtime unusable, trying bundled");
    ctx.effects()
        .downloader()
        .locate_binary_in_installation(&target)
        .and_then(RuntimeHandle::probe)
        .map(|handle| SelectedRuntime {
            handle,
            source: RuntimeSource::Bundled,
        })
}

/// Install or update the bundled runtime and its packages.
///
/// # Errors
/// Returns an error only for unexpected internal failures; install problems
/// are reported through the outcome.
pub fn node_install(ctx: &CommandContext, request: &NodeInstallRequest) -> Result<ExecutionOutcome> {
    let progress: Arc<dyn Progress> = if ctx.global.quiet || ctx.global.json {
        Arc::new(NoProgress)
    } else {
        Arc::new(TerminalProgress::new("Installing Node.js"))
    };
    let orchestrator = InstallOrchestrator::new(ctx.install_effects(progress), ctx.executor());
    let install = InstallRequest::new(ctx.config().bundled_target(), &ctx.config().node().version)
        .refresh_packages(request.refresh_packages);

    match orchestrator.run(&install) {
        Ok(report) => {
            let message = if report.up_to_date && report.packages.is_empty() {
                format!("Node.js {} already installed", report.version)
            } else {
                format!("installed Node.js {}", report.version)
            };
            Ok(ExecutionOutcome::success(message, json!(report)))
        }
        Err(err) => Ok(install_error_outcome(&err)),
    }
}

/// Run a tool of the selected runtime and capture its stdout.
///
/// # Errors
/// Returns an error only for unexpected internal failures.
pub fn node_exec(ctx: &CommandContext, request: &NodeExecRequest) -> Result<ExecutionOutcome> {
    let Some(selected) = select_runtime(ctx) else {
        return Ok(missing_runtime_outcome(ctx));
    };
    let timeout = Timeout::from_millis(request.timeout_ms);
    match ctx
        .executor()
        .run(&selected.handle, request.tool, timeout, &request.args)
    {
        Ok(stdout) => Ok(ExecutionOutcome::success(
            format!("{} finished", request.tool),
            json!({
                "stdout": stdout,
                "tool": request.tool.base_path(),
                "runtime": selected.handle.binary(),
                "source": selected.source,
                "args": request.args,
                "timeout_ms": request.timeout_ms,
            }),
        )),
        Err(err) => Ok(runtime_error_outcome(&err)),
    }
}

/// Describe the runtime commands would use and the bundled install state.
///
/// # Errors
/// Returns an error only for unexpected internal failures.
pub fn node_info(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let settings = ctx.effects().settings();
    let target = ctx.config().bundled_target();
    let expected = ctx.config().node().version.clone();
    let installed = integrity::installed_version(&target);
    let bundled = json!({
        "target": target,
        "expected_version": expected,
        "installed_version": installed,
        "integrity_ok": installed.as_deref() == Some(expected.as_str()),
    });

    let Some(selected) = select_runtime(ctx) else {
        return Ok(ExecutionOutcome::success(
            "no usable Node.js runtime",
            json!({
                "configured_path": settings.runtime_path(),
                "runtime": Value::Null,
                "bundled": bundled,
                "hint": "Run `nbx install` to download the bundled runtime.",
            }),
        ));
    };

    let handle = &selected.handle;
    let version = handle.version().ok();
    let tools: serde_json::Map<String, Value> = [ToolReference::NODE, ToolReference::NPM, ToolReference::NPX]
        .into_iter()
        .map(|tool| {
            let path = handle.resolve_tool(tool).ok();
            (tool.base_path().to_string(), json!(path))
        })
        .collect();
    let message = match &version {
        Some(version) => format!("Node.js {version} at {}", handle.binary().display()),
        None => format!("Node.js at {}", handle.binary().display()),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "configured_path": settings.runtime_path(),
            "runtime": {
                "path": handle.binary(),
                "source": selected.source,
                "valid": version.is_some(),
                "version": version,
                "tools": tools,
            },
            "bundled": bundled,
        }),
    ))
}

/// List versions the downloader can install, newest first.
///
/// # Errors
/// Returns an error only for unexpected internal failures.
pub fn node_versions(ctx: &CommandContext, request: &NodeVersionsRequest) -> Result<ExecutionOutcome> {
    let mut versions = match ctx.effects().downloader().list_available_versions() {
        Ok(versions) => versions,
        Err(err) => {
            if let Some(user) = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<InstallUserError>())
            {
                return Ok(ExecutionOutcome::user_error(
                    user.message(),
                    user.details().clone(),
                ));
            }
            return Ok(ExecutionOutcome::failure(
                "failed to list Node.js versions",
                json!({ "reason": "index_unavailable", "error": format!("{err:#}") }),
            ));
        }
    };
    let total = versions.len();
    if let Some(limit) = request.limit {
        versions.truncate(limit);
    }
    Ok(ExecutionOutcome::success(
        format!("{total} Node.js versions available"),
        json!({
            "versions": versions,
            "total": total,
            "bundled": ctx.config().node().version,
        }),
    ))
}

/// Validate a runtime and store it as the configured one.
///
/// # Errors
/// Returns an error only for unexpected internal failures.
pub fn node_use(ctx: &CommandContext, request: &NodeUseRequest) -> Result<ExecutionOutcome> {
    let Some(handle) = RuntimeHandle::probe(&request.path) else {
        return Ok(ExecutionOutcome::user_error(
            format!("{} is not a working Node.js binary", request.path.display()),
            json!({
                "reason": "invalid_runtime",
                "path": request.path,
                "hint": "Pass the path of a `node` executable that answers `--version`.",
            }),
        ));
    };
    let version = handle.version().unwrap_or_default();
    let path = handle.binary().display().to_string();
    if let Err(err) = ctx.effects().settings().set_runtime_path(&path) {
        return Ok(ExecutionOutcome::failure(
            "failed to save the runtime path",
            json!({ "reason": "settings_write_failed", "error": format!("{err:#}") }),
        ));
    }
    Ok(ExecutionOutcome::success(
        format!("using Node.js {version} at {path}"),
        json!({ "path": path, "version": version }),
    ))
}

fn missing_runtime_outcome(ctx: &CommandContext) -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        "no usable Node.js runtime",
        json!({
            "reason": "missing_runtime",
            "configured_path": ctx.effects().settings().runtime_path(),
            "bundled_target": ctx.config().bundled_target(),
            "hint": "Run `nbx install` or point `nbx use` at a node binary.",
        }),
    )
}

fn runtime_error_outcome(err: &RuntimeError) -> ExecutionOutcome {
    match err {
        RuntimeError::InvalidEnvironment { path } => ExecutionOutcome::user_error(
            err.to_string(),
            json!({ "reason": "invalid_runtime", "path": path }),
        ),
        RuntimeError::Resolution { tool, path } => ExecutionOutcome::user_error(
            err.to_string(),
            json!({
                "reason": "tool_not_found",
                "tool": tool,
                "path": path,
                "hint": "Reinstall the runtime with `nbx install`.",
            }),
        ),
        _ => ExecutionOutcome::failure(
            err.to_string(),
            json!({ "reason": "process_failed", "error": error_chain(err) }),
        ),
    }
}

fn install_error_outcome(err: &InstallError) -> ExecutionOutcome {
    if let InstallError::Busy { target } = err {
        return ExecutionOutcome::user_error(
            err.to_string(),
            json!({ "reason": err.reason(), "target": target }),
        );
    }
    if let Some(user) = find_user_error(err) {
        return ExecutionOutcome::user_error(user.message(), user.details().clone());
    }
    let mut details = json!({ "reason": err.reason(), "error": error_chain(err) });
    if let InstallError::Package { package, source } = err {
        details["package"] = json!(package);
        if let RuntimeError::ExitStatus { stdout, code, .. } = source {
            details["stdout"] = json!(stdout);
            details["code"] = json!(code);
        }
    }
    ExecutionOutcome::failure(err.to_string(), details)
}

fn find_user_error<'e>(err: &'e (dyn StdError + 'static)) -> Option<&'e InstallUserError> {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(user) = cause.downcast_ref::<InstallUserError>() {
            return Some(user);
        }
        current = cause.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        parts.push(cause.to_string());
        current = cause.source();
    }
    parts.join(": ")
}

pub fn to_json_response(info: CommandInfo, outcome: &ExecutionOutcome, _code: i32) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": format_status_message(info, &outcome.message),
        "details": details,
    })
}

#[must_use]
pub fn format_status_message(info: CommandInfo, message: &str) -> String {
    let group_name = info.group.to_string();
    let prefix = if group_name == info.name {
        format!("nbx {}", info.name)
    } else {
        format!("nbx {} {}", group_name, info.name)
    };
    if message.is_empty() {
        prefix
    } else if message.starts_with(&prefix) {
        message.to_string()
    } else {
        format!("{prefix}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CommandGroup;

    #[test]
    fn status_message_is_prefixed_once() {
        let info = CommandInfo::new(CommandGroup::Install, "install");
        assert_eq!(
            format_status_message(info, "installed Node.js v20.18.0"),
            "nbx install: installed Node.js v20.18.0"
        );
        assert_eq!(format_status_message(info, "nbx install: done"), "nbx install: done");
        assert_eq!(format_status_message(info, ""), "nbx install");
    }

    #[test]
    fn json_response_wraps_scalar_details() {
        let info = CommandInfo::new(CommandGroup::Versions, "versions");
        let outcome = ExecutionOutcome::user_error("offline", json!("no network"));
        let value = to_json_response(info, &outcome, 1);
        assert_eq!(value["status"], "user-error");
        assert_eq!(value["details"]["value"], "no network");
    }

    #[test]
    fn busy_install_is_a_user_error() {
        let outcome = install_error_outcome(&InstallError::Busy {
            target: PathBuf::from("/srv/nbx/nodejs"),
        });
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["reason"], "install_busy");
    }

    #[test]
    fn offline_download_surfaces_user_details() {
        let source = anyhow::Error::new(InstallUserError::new(
            "NBX_ONLINE=1 required to download Node.js",
            json!({ "reason": "offline" }),
        ));
        let outcome = install_error_outcome(&InstallError::Download {
            version: "v20.18.0".into(),
            source: source.into(),
        });
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["reason"], "offline");
    }

    #[test]
    fn failed_package_reports_npm_output() {
        let outcome = install_error_outcome(&InstallError::Package {
            package: "typescript".into(),
            source: RuntimeError::ExitStatus {
                program: PathBuf::from("/srv/nbx/nodejs/bin/npm"),
                code: Some(1),
                stdout: "npm ERR! typescript".into(),
            },
        });
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(outcome.details["package"], "typescript");
        assert_eq!(outcome.details["code"], 1);
        assert_eq!(outcome.details["stdout"], "npm ERR! typescript");
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::config::{Config, EnvSnapshot, GlobalOptions};
        use crate::downloader::Downloader;
        use crate::effects::{Effects, SharedEffects};
        use crate::settings::{MemorySettings, Settings};
        use crate::test_support::{fake_runtime, FakeDownloader};
        use serial_test::serial;

        struct TestEffects {
            downloader: Arc<FakeDownloader>,
            settings: Arc<MemorySettings>,
        }

        impl Effects for TestEffects {
            fn downloader(&self) -> Arc<dyn Downloader> {
                self.downloader.clone()
            }

            fn settings(&self) -> Arc<dyn Settings> {
                self.settings.clone()
            }
        }

        fn context<'a>(
            global: &'a GlobalOptions,
            home: &std::path::Path,
            settings: MemorySettings,
        ) -> Result<CommandContext<'a>> {
            let home = home.display().to_string();
            let snapshot = EnvSnapshot::testing(&[("NBX_HOME", home.as_str())]);
            let config = Config::from_snapshot(&snapshot, global)?;
            let effects: SharedEffects = Arc::new(TestEffects {
                downloader: Arc::new(FakeDownloader::new(&config.home().join("npm.log"))),
                settings: Arc::new(settings),
            });
            Ok(CommandContext::with_effects(global, config, effects))
        }

        #[test]
        #[serial]
        fn exec_without_runtime_is_a_user_error() -> Result<()> {
            let temp = tempfile::tempdir()?;
            let global = GlobalOptions::default();
            let ctx = context(&global, temp.path(), MemorySettings::default())?;
            let request = NodeExecRequest {
                tool: ToolReference::NODE,
                timeout_ms: -1,
                args: vec!["--version".into()],
            };
            let outcome = node_exec(&ctx, &request)?;
            assert_eq!(outcome.status, CommandStatus::UserError);
            assert_eq!(outcome.details["reason"], "missing_runtime");
            Ok(())
        }

        #[test]
        #[serial]
        fn exec_prefers_the_configured_runtime() -> Result<()> {
            let temp = tempfile::tempdir()?;
            let system = fake_runtime(&temp.path().join("system"), "v18.0.0")?;
            fake_runtime(&temp.path().join("nodejs"), "v20.18.0")?;
            let global = GlobalOptions::default();
            let settings = MemorySettings::with_path(system.node.display().to_string());
            let ctx = context(&global, temp.path(), settings)?;
            let request = NodeExecRequest {
                tool: ToolReference::NODE,
                timeout_ms: 2000,
                args: vec!["--version".into()],
            };
            let outcome = node_exec(&ctx, &request)?;
            assert_eq!(outcome.status, CommandStatus::Ok);
            assert_eq!(outcome.details["stdout"], "v18.0.0");
            assert_eq!(outcome.details["source"], "configured");
            Ok(())
        }

        #[test]
        #[serial]
        fn exec_falls_back_to_the_bundled_runtime() -> Result<()> {
            let temp = tempfile::tempdir()?;
            fake_runtime(&temp.path().join("nodejs"), "v20.18.0")?;
            let global = GlobalOptions::default();
            let ctx = context(&global, temp.path(), MemorySettings::with_path("/nope/node"))?;
            let request = NodeExecRequest {
                tool: ToolReference::NPM,
                timeout_ms: -1,
                args: vec!["view".into(), "left-pad".into()],
            };
            let outcome = node_exec(&ctx, &request)?;
            assert_eq!(outcome.status, CommandStatus::Ok);
            assert_eq!(outcome.details["source"], "bundled");
            assert_eq!(outcome.details["stdout"], "view  ok");
            Ok(())
        }

        #[test]
        #[serial]
        fn install_then_info_reports_bundled_runtime() -> Result<()> {
            let temp = tempfile::tempdir()?;
            let global = GlobalOptions {
                json: true,
                ..GlobalOptions::default()
            };
            let ctx = context(&global, temp.path(), MemorySettings::default())?;

            let outcome = node_install(&ctx, &NodeInstallRequest::default())?;
            assert_eq!(outcome.status, CommandStatus::Ok, "{:?}", outcome.details);
            assert_eq!(outcome.details["fetched"], true);

            let info = node_info(&ctx)?;
            assert_eq!(info.details["bundled"]["integrity_ok"], true);
            assert_eq!(info.details["runtime"]["valid"], true);
            assert_eq!(info.details["runtime"]["version"], "v20.18.0");
            assert_eq!(info.details["runtime"]["source"], "configured");
            assert!(info.details["runtime"]["tools"]["npm"].is_string());
            assert!(info.details["runtime"]["tools"]["npx"].is_null());
            Ok(())
        }

        #[test]
        #[serial]
        fn use_rejects_broken_binaries_and_stores_working_ones() -> Result<()> {
            let temp = tempfile::tempdir()?;
            let global = GlobalOptions::default();
            let ctx = context(&global, temp.path(), MemorySettings::default())?;

            let broken = node_use(
                &ctx,
                &NodeUseRequest {
                    path: temp.path().join("missing/node"),
                },
            )?;
            assert_eq!(broken.status, CommandStatus::UserError);
            assert_eq!(ctx.effects().settings().runtime_path(), None);

            let runtime = fake_runtime(&temp.path().join("system"), "v18.0.0")?;
            let used = node_use(&ctx, &NodeUseRequest { path: runtime.node.clone() })?;
            assert_eq!(used.status, CommandStatus::Ok);
            assert_eq!(used.details["version"], "v18.0.0");
            assert_eq!(
                ctx.effects().settings().runtime_path(),
                Some(runtime.node.display().to_string())
            );
            Ok(())
        }

        #[test]
        #[serial]
        fn versions_respects_limit() -> Result<()> {
            let temp = tempfile::tempdir()?;
            let global = GlobalOptions::default();
            let ctx = context(&global, temp.path(), MemorySettings::default())?;
            let outcome = node_versions(&ctx, &NodeVersionsRequest { limit: Some(1) })?;
            assert_eq!(outcome.details["versions"], json!(["v15.12.0"]));
            assert_eq!(outcome.details["total"], 2);
            Ok(())
        }
    }
}
