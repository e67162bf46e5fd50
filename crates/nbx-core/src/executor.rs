//! Synchronous tool invocation against a [`RuntimeHandle`].

use std::path::Path;

use nbx_domain::ToolReference;
use serde::Serialize;
use tracing::debug;

use crate::error::RuntimeError;
use crate::process::{self, CapturedOutput, Timeout};
use crate::runtime::RuntimeHandle;

/// How command-line arguments reach the child process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentStyle {
    /// All arguments joined with single spaces and passed as one argument.
    Joined,
    /// One argv entry per argument.
    #[default]
    Separate,
}

impl ArgumentStyle {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "joined" => Some(ArgumentStyle::Joined),
            "separate" | "" => Some(ArgumentStyle::Separate),
            _ => None,
        }
    }

    fn render(self, args: &[String]) -> Vec<String> {
        match self {
            ArgumentStyle::Separate => args.to_vec(),
            ArgumentStyle::Joined if args.is_empty() => Vec::new(),
            ArgumentStyle::Joined => vec![args.join(" ")],
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Executor {
    style: ArgumentStyle,
}

impl Executor {
    #[must_use]
    pub fn new(style: ArgumentStyle) -> Self {
        Self { style }
    }

    /// Run `tool` from `env` and return its stdout without trailing line breaks.
    ///
    /// The exit status is not inspected. With a bounded `timeout` the call
    /// returns at the deadline with whatever output was produced so far.
    ///
    /// # Errors
    /// Fails when the runtime is invalid, the tool cannot be resolved, or the
    /// process cannot be spawned or waited on.
    pub fn run(
        &self,
        env: &RuntimeHandle,
        tool: ToolReference,
        timeout: Timeout,
        args: &[String],
    ) -> Result<String, RuntimeError> {
        let output = self.invoke(env, tool, timeout, args)?;
        Ok(trim_line_breaks(output.stdout))
    }

    /// Like [`Executor::run`], but a non-zero exit (or a child still running
    /// at the deadline) is reported as [`RuntimeError::ExitStatus`].
    ///
    /// # Errors
    /// Everything [`Executor::run`] reports, plus unsuccessful exits.
    pub fn run_checked(
        &self,
        env: &RuntimeHandle,
        tool: ToolReference,
        timeout: Timeout,
        args: &[String],
    ) -> Result<String, RuntimeError> {
        let (program, output) = self.invoke_resolved(env, tool, timeout, args)?;
        let stdout = trim_line_breaks(output.stdout);
        match output.status {
            Some(status) if status.success() => Ok(stdout),
            status => Err(RuntimeError::ExitStatus {
                program,
                code: status.and_then(|status| status.code()),
                stdout,
            }),
        }
    }

    fn invoke(
        &self,
        env: &RuntimeHandle,
        tool: ToolReference,
        timeout: Timeout,
        args: &[String],
    ) -> Result<CapturedOutput, RuntimeError> {
        self.invoke_resolved(env, tool, timeout, args)
            .map(|(_, output)| output)
    }

    fn invoke_resolved(
        &self,
        env: &RuntimeHandle,
        tool: ToolReference,
        timeout: Timeout,
        args: &[String],
    ) -> Result<(std::path::PathBuf, CapturedOutput), RuntimeError> {
        if !env.is_valid() {
            return Err(RuntimeError::InvalidEnvironment {
                path: env.binary().to_path_buf(),
            });
        }
        let program = env.resolve_tool(tool)?;
        let output = self.spawn(&program, timeout, args)?;
        Ok((program, output))
    }

    fn spawn(
        &self,
        program: &Path,
        timeout: Timeout,
        args: &[String],
    ) -> Result<CapturedOutput, RuntimeError> {
        let argv = self.style.render(args);
        let output = process::run_captured(program, &argv, timeout)?;
        if output.truncated {
            debug!(program = %program.display(), "stdout exceeded capture limit; kept the tail");
        }
        Ok(output)
    }
}

fn trim_line_breaks(mut text: String) -> String {
    let keep = text.trim_end_matches(['\r', '\n']).len();
    text.truncate(keep);
    text
}
