use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};

use crate::downloader::Downloader;
use crate::node_dist::{binary_in_installation, installation_root_of};
use crate::progress::Progress;

pub(crate) fn write_script(path: &Path, body: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("#!/bin/sh\n{body}"))
        .with_context(|| format!("writing {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(path.to_path_buf())
}

#[derive(Debug, Clone)]
pub(crate) struct FakeRuntime {
    pub(crate) node: PathBuf,
    pub(crate) npm: PathBuf,
    pub(crate) log: PathBuf,
}

/// A `bin/node` that prints `version` plus a `bin/npm` that appends its
/// arguments to `root/npm.log`.
pub(crate) fn fake_runtime(root: &Path, version: &str) -> Result<FakeRuntime> {
    fake_runtime_with(root, version, &root.join("npm.log"), None)
}

/// Like [`fake_runtime`], logging to `log` and exiting non-zero whenever the
/// package argument equals `fail_package`.
pub(crate) fn fake_runtime_with(
    root: &Path,
    version: &str,
    log: &Path,
    fail_package: Option<&str>,
) -> Result<FakeRuntime> {
    let node = write_script(&root.join("bin/node"), &format!("echo {version}\n"))?;
    let fail_check = match fail_package {
        Some(package) => format!("if [ \"$4\" = '{package}' ]; then echo \"npm ERR! $4\"; exit 1; fi\n"),
        None => String::new(),
    };
    let npm_body = format!(
        "echo \"$*\" >> '{log}'\n{fail_check}if [ \"$1\" = install ]; then mkdir -p \"$3/node_modules/$4\"; fi\necho \"$1 $4 ok\"\n",
        log = log.display(),
    );
    let npm = write_script(&root.join("bin/npm"), &npm_body)?;
    Ok(FakeRuntime {
        node,
        npm,
        log: log.to_path_buf(),
    })
}

pub(crate) fn read_log(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .map(|text| text.lines().map(ToOwned::to_owned).collect())
        .unwrap_or_default()
}

/// Downloader that materializes a fake runtime instead of talking to a mirror.
pub(crate) struct FakeDownloader {
    log: PathBuf,
    fail_package: Option<String>,
    root_override: Option<PathBuf>,
    fail_fetch: bool,
    fetches: AtomicUsize,
}

impl FakeDownloader {
    pub(crate) fn new(log: &Path) -> Self {
        Self {
            log: log.to_path_buf(),
            fail_package: None,
            root_override: None,
            fail_fetch: false,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_package(mut self, package: &str) -> Self {
        self.fail_package = Some(package.to_string());
        self
    }

    pub(crate) fn reporting_root(mut self, root: &Path) -> Self {
        self.root_override = Some(root.to_path_buf());
        self
    }

    pub(crate) fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Downloader for FakeDownloader {
    fn list_available_versions(&self) -> Result<Vec<String>> {
        Ok(vec!["v15.12.0".into(), "v14.0.0".into()])
    }

    fn fetch(&self, version: &str, target_parent: &Path) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch {
            bail!("mirror unreachable");
        }
        let root = target_parent.join(format!("node-{version}-fake"));
        let runtime = fake_runtime_with(&root, version, &self.log, self.fail_package.as_deref())?;
        Ok(runtime.node)
    }

    fn locate_installation_root(&self, binary: &Path) -> Option<PathBuf> {
        self.root_override
            .clone()
            .or_else(|| installation_root_of(binary))
    }

    fn locate_binary_in_installation(&self, dir: &Path) -> Option<PathBuf> {
        binary_in_installation(dir)
    }
}

#[derive(Default)]
pub(crate) struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    fn record(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Progress for RecordingProgress {
    fn start(&self) {
        self.record("start".into());
    }

    fn switch_to_indeterminate(&self) {
        self.record("indeterminate".into());
    }

    fn switch_to_determinate(&self, total: usize) {
        self.record(format!("determinate:{total}"));
    }

    fn advance(&self, completed: usize) {
        self.record(format!("advance:{completed}"));
    }

    fn message(&self, text: &str) {
        self.record(format!("message:{text}"));
    }

    fn finish(&self, text: &str) {
        self.record(format!("finish:{text}"));
    }
}
