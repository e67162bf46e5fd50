use std::env;
use std::fmt;

use anyhow::{bail, Result};
use serde::Serialize;

/// Host family used to pick a tool's executable extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Windows,
    Unix,
    Mac,
}

impl HostPlatform {
    #[must_use]
    pub fn current() -> Self {
        Self::from_os(env::consts::OS)
    }

    #[must_use]
    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => HostPlatform::Windows,
            "macos" | "ios" => HostPlatform::Mac,
            _ => HostPlatform::Unix,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HostPlatform::Windows => "windows",
            HostPlatform::Unix => "unix",
            HostPlatform::Mac => "mac",
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::TarGz => ".tar.gz",
            ArchiveKind::Zip => ".zip",
        }
    }
}

/// A Node.js distribution flavour as published under `<dist>/<version>/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DistTarget {
    pub os: &'static str,
    pub arch: &'static str,
    pub archive: ArchiveKind,
    /// Key used in the `files` array of the dist `index.json`.
    pub index_key: &'static str,
}

impl DistTarget {
    pub fn detect() -> Result<Self> {
        Self::for_host(env::consts::OS, env::consts::ARCH)
    }

    pub fn for_host(os: &str, arch: &str) -> Result<Self> {
        match (os, arch) {
            ("linux", "x86_64") => Ok(DistTarget {
                os: "linux",
                arch: "x64",
                archive: ArchiveKind::TarGz,
                index_key: "linux-x64",
            }),
            ("linux", "aarch64") => Ok(DistTarget {
                os: "linux",
                arch: "arm64",
                archive: ArchiveKind::TarGz,
                index_key: "linux-arm64",
            }),
            ("macos", "x86_64") => Ok(DistTarget {
                os: "darwin",
                arch: "x64",
                archive: ArchiveKind::TarGz,
                index_key: "osx-x64-tar",
            }),
            ("macos", "aarch64") => Ok(DistTarget {
                os: "darwin",
                arch: "arm64",
                archive: ArchiveKind::TarGz,
                index_key: "osx-arm64-tar",
            }),
            ("windows", "x86_64") => Ok(DistTarget {
                os: "win",
                arch: "x64",
                archive: ArchiveKind::Zip,
                index_key: "win-x64-zip",
            }),
            ("windows", "aarch64") => Ok(DistTarget {
                os: "win",
                arch: "arm64",
                archive: ArchiveKind::Zip,
                index_key: "win-arm64-zip",
            }),
            (os, arch) => bail!("unsupported host platform {os}-{arch} for Node.js downloads"),
        }
    }

    /// Name of the top-level directory inside the archive, e.g. `node-v20.18.0-linux-x64`.
    #[must_use]
    pub fn archive_stem(&self, version: &str) -> String {
        format!("node-{version}-{}-{}", self.os, self.arch)
    }

    #[must_use]
    pub fn archive_name(&self, version: &str) -> String {
        format!("{}{}", self.archive_stem(version), self.archive.extension())
    }
}
