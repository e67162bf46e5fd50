//! Logical names for the executables that ship next to a `node` binary.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use serde::Serialize;

use crate::platform::HostPlatform;

/// A tool executable addressed relative to the runtime's directory.
///
/// Resolution picks exactly one extension, chosen by the host platform; an
/// empty extension means the bare base path is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ToolReference {
    base_path: &'static str,
    windows_ext: &'static str,
    unix_ext: &'static str,
    mac_ext: &'static str,
}

impl ToolReference {
    /// The primary interpreter.
    pub const NODE: ToolReference = ToolReference::new("node", "exe", "", "");
    /// The package manager.
    pub const NPM: ToolReference = ToolReference::new("npm", "cmd", "", "");
    pub const NPX: ToolReference = ToolReference::new("npx", "cmd", "", "");

    #[must_use]
    pub const fn new(
        base_path: &'static str,
        windows_ext: &'static str,
        unix_ext: &'static str,
        mac_ext: &'static str,
    ) -> Self {
        Self {
            base_path,
            windows_ext,
            unix_ext,
            mac_ext,
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &'static str {
        self.base_path
    }

    #[must_use]
    pub fn extension(&self, platform: HostPlatform) -> &'static str {
        match platform {
            HostPlatform::Windows => self.windows_ext,
            HostPlatform::Unix => self.unix_ext,
            HostPlatform::Mac => self.mac_ext,
        }
    }

    /// File name (possibly with leading path segments) of this tool on `platform`.
    #[must_use]
    pub fn file_name(&self, platform: HostPlatform) -> String {
        let extension = self.extension(platform);
        if extension.is_empty() {
            self.base_path.to_string()
        } else {
            format!("{}.{extension}", self.base_path)
        }
    }
}

impl fmt::Display for ToolReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_path)
    }
}

impl FromStr for ToolReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node" | "nodejs" => Ok(ToolReference::NODE),
            "npm" => Ok(ToolReference::NPM),
            "npx" => Ok(ToolReference::NPX),
            other => Err(anyhow!("unknown tool `{other}` (expected node, npm or npx)")),
        }
    }
}
