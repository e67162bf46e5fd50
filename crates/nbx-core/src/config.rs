use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nbx_domain::normalize_version;
use serde::{Deserialize, Serialize};

use crate::executor::ArgumentStyle;
use crate::node_dist::DEFAULT_DIST_URL;

pub const DEFAULT_NODE_VERSION: &str = "v20.18.0";
/// Directory under the home that holds the bundled runtime.
pub const BUNDLED_DIR: &str = "nodejs";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
    pub home: Option<PathBuf>,
    pub node_version: Option<String>,
    pub offline: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) home: PathBuf,
    pub(crate) settings_path: PathBuf,
    pub(crate) node: NodeConfig,
    pub(crate) network: NetworkConfig,
    pub(crate) executor: ExecutorConfig,
}

impl Config {
    /// Builds a configuration from the process environment plus CLI overrides.
    ///
    /// # Errors
    /// Returns an error if no home directory can be determined or a variable
    /// holds an invalid value.
    pub fn from_env(global: &GlobalOptions) -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture(), global)
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot, global: &GlobalOptions) -> Result<Self> {
        let home = match (&global.home, snapshot.var("NBX_HOME")) {
            (Some(home), _) => home.clone(),
            (None, Some(home)) if !home.trim().is_empty() => PathBuf::from(home),
            _ => dirs_next::home_dir()
                .map(|home| home.join(".nbx"))
                .ok_or_else(|| anyhow!("home directory not found; set NBX_HOME"))?,
        };
        let settings_path = snapshot
            .var("NBX_SETTINGS")
            .filter(|value| !value.trim().is_empty())
            .map_or_else(|| home.join("settings.json"), PathBuf::from);

        let raw_version = global
            .node_version
            .as_deref()
            .or_else(|| snapshot.var("NBX_NODE_VERSION"))
            .unwrap_or(DEFAULT_NODE_VERSION);
        let version = normalize_version(raw_version)
            .with_context(|| format!("invalid node version `{raw_version}`"))?;
        let dist_url = snapshot
            .var("NBX_NODE_DIST_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_DIST_URL)
            .to_string();

        let online = !global.offline
            && match snapshot.var("NBX_ONLINE") {
                Some(value) => {
                    let lowered = value.to_ascii_lowercase();
                    !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
                }
                None => true,
            };

        let argument_style = match snapshot.var("NBX_ARGUMENT_STYLE") {
            Some(raw) => ArgumentStyle::parse(raw).ok_or_else(|| {
                anyhow!("invalid NBX_ARGUMENT_STYLE `{raw}` (expected `joined` or `separate`)")
            })?,
            None => ArgumentStyle::default(),
        };

        Ok(Self {
            home,
            settings_path,
            node: NodeConfig { version, dist_url },
            network: NetworkConfig { online },
            executor: ExecutorConfig { argument_style },
        })
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Install target of the bundled runtime.
    #[must_use]
    pub fn bundled_target(&self) -> PathBuf {
        self.home.join(BUNDLED_DIR)
    }

    #[must_use]
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    #[must_use]
    pub fn node(&self) -> &NodeConfig {
        &self.node
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    #[must_use]
    pub fn executor(&self) -> &ExecutorConfig {
        &self.executor
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub version: String,
    pub dist_url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub online: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub argument_style: ArgumentStyle,
}
