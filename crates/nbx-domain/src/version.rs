use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error, Result};
use serde::Serialize;

/// A released Node.js version such as `v15.12.0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct NodeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl NodeVersion {
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Ord for NodeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for NodeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for NodeVersion {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let raw = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let mut parts = raw.split('.');
        let mut component = |name: &str| -> Result<u64> {
            parts
                .next()
                .filter(|part| !part.is_empty())
                .ok_or_else(|| anyhow!("node version `{input}` is missing its {name} component"))?
                .parse::<u64>()
                .map_err(|err| anyhow!("invalid {name} component in node version `{input}`: {err}"))
        };
        let major = component("major")?;
        let minor = component("minor")?;
        let patch = component("patch")?;
        if parts.next().is_some() {
            return Err(anyhow!("node version `{input}` has too many components"));
        }
        Ok(NodeVersion::new(major, minor, patch))
    }
}

/// Canonical `vMAJOR.MINOR.PATCH` spelling of a version string.
pub fn normalize_version(input: &str) -> Result<String> {
    Ok(input.parse::<NodeVersion>()?.to_string())
}
