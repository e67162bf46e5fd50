use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use nbx_core::ToolReference;

pub const NBX_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const NBX_BEFORE_HELP: &str = concat!(
    "nbx ",
    env!("CARGO_PKG_VERSION"),
    " – Bundled Node.js runtime manager\n\n",
    "\x1b[1;36mCommands\x1b[0m\n",
    "  install          Download the bundled Node.js and its npm packages.\n",
    "  exec             Run node, npm or npx from the selected runtime.\n",
    "  info             Show which runtime nbx would use and the install state.\n",
    "  versions         List Node.js releases available for this platform.\n",
    "  use              Point nbx at an existing node binary.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "nbx",
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = NBX_BEFORE_HELP,
    help_template = NBX_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct NbxCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory holding the bundled runtime and settings (defaults to NBX_HOME or ~/.nbx)",
        global = true
    )]
    pub home: Option<PathBuf>,
    #[arg(
        long,
        value_name = "VERSION",
        help = "Node.js version to bundle (defaults to NBX_NODE_VERSION)",
        global = true
    )]
    pub node_version: Option<String>,
    #[arg(
        long,
        help = "Never touch the network for this invocation (sets NBX_ONLINE=0)",
        global = true
    )]
    pub offline: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(
        about = "Install the bundled Node.js runtime, then npm, typescript and typescript-language-server.",
        override_usage = "nbx install [--refresh-packages]"
    )]
    Install(InstallArgs),
    #[command(
        about = "Run node, npm or npx from the configured or bundled runtime.",
        override_usage = "nbx exec <TOOL> [--timeout-ms MS] [-- ARGS...]"
    )]
    Exec(ExecArgs),
    #[command(about = "Show the selected runtime, its tools and the bundled install state.")]
    Info,
    #[command(
        about = "List Node.js versions the mirror offers for this platform.",
        override_usage = "nbx versions [--limit N]"
    )]
    Versions(VersionsArgs),
    #[command(
        about = "Store an existing node binary as the configured runtime.",
        override_usage = "nbx use <PATH>"
    )]
    Use(UseArgs),
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[arg(
        long,
        help = "Re-run the npm package installs even when the runtime is up to date"
    )]
    pub refresh_packages: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[arg(value_name = "TOOL", value_parser = parse_tool, help = "node, npm or npx")]
    pub tool: ToolReference,
    #[arg(
        long,
        value_name = "MS",
        default_value_t = -1,
        allow_negative_numbers = true,
        help = "Stop waiting after MS milliseconds (negative waits forever)"
    )]
    pub timeout_ms: i64,
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..
    )]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionsArgs {
    #[arg(long, value_name = "N", help = "Only show the newest N versions")]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct UseArgs {
    #[arg(value_name = "PATH", help = "Path of a node executable")]
    pub path: PathBuf,
}

fn parse_tool(raw: &str) -> Result<ToolReference, String> {
    raw.parse::<ToolReference>().map_err(|err| err.to_string())
}
