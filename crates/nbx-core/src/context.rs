use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::{Config, GlobalOptions};
use crate::effects::{Effects, SharedEffects, SystemEffects};
use crate::executor::Executor;
use crate::orchestrator::InstallEffects;
use crate::progress::Progress;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandGroup {
    Install,
    Exec,
    Info,
    Versions,
    Use,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandGroup::Install => "install",
            CommandGroup::Exec => "exec",
            CommandGroup::Info => "info",
            CommandGroup::Versions => "versions",
            CommandGroup::Use => "use",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CommandInfo {
    pub group: CommandGroup,
    pub name: &'static str,
}

impl CommandInfo {
    #[must_use]
    pub const fn new(group: CommandGroup, name: &'static str) -> Self {
        Self { group, name }
    }
}

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    config: Config,
    effects: SharedEffects,
}

impl<'a> CommandContext<'a> {
    /// Creates a context from the process environment and the CLI options.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the system
    /// collaborators cannot be built.
    pub fn new(global: &'a GlobalOptions) -> Result<Self> {
        let config = Config::from_env(global)?;
        let effects: SharedEffects = Arc::new(SystemEffects::new(&config)?);
        Ok(Self::with_effects(global, config, effects))
    }

    #[must_use]
    pub fn with_effects(global: &'a GlobalOptions, config: Config, effects: SharedEffects) -> Self {
        Self {
            global,
            config,
            effects,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn effects(&self) -> &dyn Effects {
        self.effects.as_ref()
    }

    pub fn is_online(&self) -> bool {
        self.config.network().online
    }

    pub fn executor(&self) -> Executor {
        Executor::new(self.config.executor().argument_style)
    }

    pub fn install_effects(&self, progress: Arc<dyn Progress>) -> InstallEffects {
        InstallEffects {
            downloader: self.effects.downloader(),
            settings: self.effects.settings(),
            progress,
        }
    }
}
