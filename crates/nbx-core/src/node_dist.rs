//! Downloads from a nodejs.org style dist mirror (`<dist>/index.json`,
//! `<dist>/<version>/<archive>`, `<dist>/<version>/SHASUMS256.txt`).

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use nbx_domain::{normalize_version, ArchiveKind, DistTarget, NodeVersion};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tar::Archive;
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::downloader::Downloader;
use crate::fs::{remove_tree, StagingDir};
use crate::net::build_http_client;
use crate::outcome::InstallUserError;

pub const DEFAULT_DIST_URL: &str = "https://nodejs.org/dist";

#[derive(Clone, Debug, PartialEq, Eq)]
enum DistSource {
    Http(String),
    File(PathBuf),
}

impl DistSource {
    fn parse(raw: &str) -> Self {
        if let Some(path) = raw.strip_prefix("file://") {
            DistSource::File(PathBuf::from(path))
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            DistSource::Http(raw.trim_end_matches('/').to_string())
        } else {
            DistSource::File(PathBuf::from(raw))
        }
    }

    fn describe(&self, relative: &str) -> String {
        match self {
            DistSource::Http(base) => format!("{base}/{relative}"),
            DistSource::File(root) => root.join(relative).display().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
    #[serde(default)]
    files: Vec<String>,
}

pub struct NodeDistDownloader {
    source: DistSource,
    online: bool,
    target: Option<DistTarget>,
    client: Client,
}

impl NodeDistDownloader {
    /// Downloader for the running host.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(dist_url: &str, online: bool) -> Result<Self> {
        let target = match DistTarget::detect() {
            Ok(target) => Some(target),
            Err(err) => {
                debug!(%err, "no node distribution for this host");
                None
            }
        };
        Self::build(dist_url, online, target)
    }

    /// Downloader pinned to an explicit distribution flavour.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn with_target(dist_url: &str, online: bool, target: DistTarget) -> Result<Self> {
        Self::build(dist_url, online, Some(target))
    }

    fn build(dist_url: &str, online: bool, target: Option<DistTarget>) -> Result<Self> {
        Ok(Self {
            source: DistSource::parse(dist_url),
            online,
            target,
            client: build_http_client()?,
        })
    }

    fn target(&self) -> Result<DistTarget> {
        self.target.ok_or_else(|| {
            anyhow!(
                "unsupported host platform {}-{} for Node.js downloads",
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        })
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online || matches!(self.source, DistSource::File(_)) {
            return Ok(());
        }
        Err(InstallUserError::new(
            "NBX_ONLINE=1 required to download Node.js",
            json!({
                "reason": "offline",
                "hint": "Unset NBX_ONLINE or drop --offline, or point NBX_NODE_DIST_URL at a local mirror.",
            }),
        )
        .into())
    }

    fn read_bytes(&self, relative: &str) -> Result<Vec<u8>> {
        match &self.source {
            DistSource::Http(base) => {
                let url = format!("{base}/{relative}");
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .with_context(|| format!("failed to download {url}"))?
                    .error_for_status()
                    .with_context(|| format!("request failed ({url})"))?;
                response
                    .bytes()
                    .map(|bytes| bytes.to_vec())
                    .with_context(|| format!("failed to read body of {url}"))
            }
            DistSource::File(root) => {
                let path = root.join(relative);
                fs::read(&path).with_context(|| format!("reading {}", path.display()))
            }
        }
    }

    fn download_to_temp(&self, relative: &str) -> Result<TempPath> {
        let mut file = NamedTempFile::new().context("creating temporary file for node archive")?;
        match &self.source {
            DistSource::Http(base) => {
                let url = format!("{base}/{relative}");
                let mut response = self
                    .client
                    .get(&url)
                    .send()
                    .with_context(|| format!("failed to download {url}"))?
                    .error_for_status()
                    .with_context(|| format!("download failed for {url}"))?;
                response
                    .copy_to(file.as_file_mut())
                    .with_context(|| format!("failed to write {relative}"))?;
            }
            DistSource::File(root) => {
                let path = root.join(relative);
                let mut source =
                    File::open(&path).with_context(|| format!("opening {}", path.display()))?;
                io::copy(&mut source, file.as_file_mut())
                    .with_context(|| format!("copying {}", path.display()))?;
            }
        }
        Ok(file.into_temp_path())
    }

    /// Expected SHA-256 of `archive_name`, when the mirror publishes sums.
    fn expected_checksum(&self, version: &str, archive_name: &str) -> Option<String> {
        let relative = format!("{version}/SHASUMS256.txt");
        let bytes = match self.read_bytes(&relative) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(%err, "no checksum list for {version}");
                return None;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let found = parse_shasums(&text, archive_name);
        if found.is_none() {
            warn!(archive = archive_name, "checksum list does not mention archive");
        }
        found
    }
}

impl Downloader for NodeDistDownloader {
    fn list_available_versions(&self) -> Result<Vec<String>> {
        self.ensure_online()?;
        let bytes = self.read_bytes("index.json").with_context(|| {
            format!(
                "failed to fetch node version index from {}",
                self.source.describe("index.json")
            )
        })?;
        let entries: Vec<IndexEntry> =
            serde_json::from_slice(&bytes).context("invalid node version index")?;
        let key = self.target.map(|target| target.index_key);
        let mut versions: Vec<NodeVersion> = entries
            .into_iter()
            .filter(|entry| key.map_or(true, |key| entry.files.iter().any(|file| file == key)))
            .filter_map(|entry| entry.version.parse().ok())
            .collect();
        versions.sort_by(|left, right| right.cmp(left));
        versions.dedup();
        Ok(versions.iter().map(ToString::to_string).collect())
    }

    fn fetch(&self, version: &str, target_parent: &Path) -> Result<PathBuf> {
        self.ensure_online()?;
        let target = self.target()?;
        let version = normalize_version(version)?;
        let archive_name = target.archive_name(&version);
        let relative = format!("{version}/{archive_name}");
        info!(version = %version, archive = %archive_name, "downloading node runtime");
        let archive = self.download_to_temp(&relative)?;

        if let Some(expected) = self.expected_checksum(&version, &archive_name) {
            let actual = sha256_file(&archive)?;
            if !actual.eq_ignore_ascii_case(&expected) {
                bail!("checksum mismatch for {archive_name}: expected {expected}, got {actual}");
            }
            debug!(archive = %archive_name, "checksum verified");
        }

        let stage = StagingDir::new_in(target_parent)?;
        extract_archive(&archive, stage.path(), target.archive)?;
        let stem = target.archive_stem(&version);
        let extracted = stage.path().join(&stem);
        if !extracted.is_dir() {
            bail!("{archive_name} does not contain a top-level {stem}/ directory");
        }
        let dest = target_parent.join(&stem);
        remove_tree(&dest)?;
        fs::rename(&extracted, &dest).with_context(|| {
            format!(
                "failed to move {} to {}",
                extracted.display(),
                dest.display()
            )
        })?;
        binary_in_installation(&dest)
            .ok_or_else(|| anyhow!("node binary missing from {}", dest.display()))
    }

    fn locate_installation_root(&self, binary: &Path) -> Option<PathBuf> {
        installation_root_of(binary)
    }

    fn locate_binary_in_installation(&self, dir: &Path) -> Option<PathBuf> {
        binary_in_installation(dir)
    }
}

/// Root of the installation a `node` binary lives in (`<root>/bin/node` on
/// Unix archives, `<root>/node.exe` on Windows archives).
pub(crate) fn installation_root_of(binary: &Path) -> Option<PathBuf> {
    let dir = binary.parent()?;
    if dir.file_name().is_some_and(|name| name == "bin") {
        dir.parent().map(Path::to_path_buf)
    } else {
        Some(dir.to_path_buf())
    }
}

pub(crate) fn binary_in_installation(dir: &Path) -> Option<PathBuf> {
    [dir.join("bin").join("node"), dir.join("node.exe")]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

fn parse_shasums(text: &str, archive_name: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?;
        (name.trim_start_matches('*') == archive_name).then(|| hash.to_ascii_lowercase())
    })
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut chunk)
            .with_context(|| format!("reading {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn extract_archive(archive: &Path, dest: &Path, kind: ArchiveKind) -> Result<()> {
    match kind {
        ArchiveKind::TarGz => {
            let file = File::open(archive)
                .with_context(|| format!("opening node archive {}", archive.display()))?;
            let decoder = GzDecoder::new(file);
            let mut tar = Archive::new(decoder);
            tar.set_preserve_permissions(true);
            tar.unpack(dest)
                .with_context(|| format!("extracting archive into {}", dest.display()))?;
        }
        ArchiveKind::Zip => {
            let file = File::open(archive)
                .with_context(|| format!("opening node archive {}", archive.display()))?;
            let mut zip = ZipArchive::new(file)
                .with_context(|| format!("reading zip archive {}", archive.display()))?;
            zip.extract(dest)
                .with_context(|| format!("extracting zip archive into {}", dest.display()))?;
        }
    }
    Ok(())
}
