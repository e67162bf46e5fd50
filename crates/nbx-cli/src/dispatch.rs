use color_eyre::Result;
use nbx_core::{
    CommandContext, CommandGroup, CommandInfo, ExecutionOutcome, GlobalOptions, InstallUserError,
    NodeExecRequest, NodeInstallRequest, NodeUseRequest, NodeVersionsRequest,
};
use serde_json::json;
use tracing::debug;

use crate::cli::CommandGroupCli;

pub fn command_info(group: &CommandGroupCli) -> CommandInfo {
    match group {
        CommandGroupCli::Install(_) => CommandInfo::new(CommandGroup::Install, "install"),
        CommandGroupCli::Exec(_) => CommandInfo::new(CommandGroup::Exec, "exec"),
        CommandGroupCli::Info => CommandInfo::new(CommandGroup::Info, "info"),
        CommandGroupCli::Versions(_) => CommandInfo::new(CommandGroup::Versions, "versions"),
        CommandGroupCli::Use(_) => CommandInfo::new(CommandGroup::Use, "use"),
    }
}

pub fn dispatch_command(
    global: &GlobalOptions,
    group: &CommandGroupCli,
) -> Result<(CommandInfo, ExecutionOutcome)> {
    let info = command_info(group);
    let ctx = match CommandContext::new(global) {
        Ok(ctx) => ctx,
        Err(err) => {
            return Ok((
                info,
                ExecutionOutcome::user_error(
                    format!("{err:#}"),
                    json!({
                        "reason": "invalid_config",
                        "hint": "Check the NBX_* environment variables and --home/--node-version.",
                    }),
                ),
            ))
        }
    };
    debug!(
        home = %ctx.config().home().display(),
        version = %ctx.config().node().version,
        online = ctx.is_online(),
        "dispatching nbx {}",
        info.name
    );

    match group {
        CommandGroupCli::Install(args) => {
            let request = NodeInstallRequest {
                refresh_packages: args.refresh_packages,
            };
            core_call(info, || nbx_core::node_install(&ctx, &request))
        }
        CommandGroupCli::Exec(args) => {
            let request = NodeExecRequest {
                tool: args.tool,
                timeout_ms: args.timeout_ms,
                args: args.args.clone(),
            };
            core_call(info, || nbx_core::node_exec(&ctx, &request))
        }
        CommandGroupCli::Info => core_call(info, || nbx_core::node_info(&ctx)),
        CommandGroupCli::Versions(args) => {
            let request = NodeVersionsRequest { limit: args.limit };
            core_call(info, || nbx_core::node_versions(&ctx, &request))
        }
        CommandGroupCli::Use(args) => {
            let request = NodeUseRequest {
                path: args.path.clone(),
            };
            core_call(info, || nbx_core::node_use(&ctx, &request))
        }
    }
}

fn core_call<F>(info: CommandInfo, action: F) -> Result<(CommandInfo, ExecutionOutcome)>
where
    F: FnOnce() -> anyhow::Result<ExecutionOutcome>,
{
    match action() {
        Ok(outcome) => Ok((info, outcome)),
        Err(err) => {
            if let Some(user) = err.downcast_ref::<InstallUserError>() {
                return Ok((
                    info,
                    ExecutionOutcome::user_error(user.message().to_string(), user.details().clone()),
                ));
            }
            let issues: Vec<String> = err.chain().map(ToString::to_string).collect();
            Ok((
                info,
                ExecutionOutcome::failure(
                    format!("nbx {} failed", info.name),
                    json!({ "reason": "internal_error", "issues": issues, "error": format!("{err:#}") }),
                ),
            ))
        }
    }
}
