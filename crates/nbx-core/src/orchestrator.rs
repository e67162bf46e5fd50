//! Idempotent install/update of the bundled runtime and its packages.
//!
//! A run moves through these phases in order:
//! 1. skip to phase 5 when the integrity marker already names the version;
//! 2. fetch the distribution next to the target;
//! 3. move the unpacked installation onto the target (a failed move is
//!    tolerated and the fetched binary is used as-is);
//! 4. rewrite the integrity marker;
//! 5. point the settings at the new binary unless they already hold a
//!    working runtime;
//! 6. install and update every auxiliary package with `npm`.
//!
//! A run whose marker is already valid stops after phase 1 unless
//! [`InstallRequest::refresh_packages`] is set.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use nbx_domain::{AuxiliaryPackageSet, InstallLayout, ToolReference};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::downloader::Downloader;
use crate::error::InstallError;
use crate::executor::Executor;
use crate::fs::atomic_move;
use crate::integrity;
use crate::lock::InstallLock;
use crate::process::Timeout;
use crate::progress::Progress;
use crate::runtime::RuntimeHandle;
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub target: PathBuf,
    pub version: String,
    pub packages: AuxiliaryPackageSet,
    /// Run the package phase even when the runtime is already current.
    pub refresh_packages: bool,
}

impl InstallRequest {
    pub fn new(target: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            version: version.into(),
            packages: AuxiliaryPackageSet::bundled(),
            refresh_packages: false,
        }
    }

    #[must_use]
    pub fn with_packages(mut self, packages: AuxiliaryPackageSet) -> Self {
        self.packages = packages;
        self
    }

    #[must_use]
    pub fn refresh_packages(mut self, refresh: bool) -> Self {
        self.refresh_packages = refresh;
        self
    }
}

#[derive(Clone)]
pub struct InstallEffects {
    pub downloader: Arc<dyn Downloader>,
    pub settings: Arc<dyn Settings>,
    pub progress: Arc<dyn Progress>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub target: PathBuf,
    pub version: String,
    /// The marker already matched; nothing was downloaded.
    pub up_to_date: bool,
    pub fetched: bool,
    pub moved: bool,
    pub binary: Option<PathBuf>,
    /// The settings were pointed at `binary`.
    pub configured: bool,
    pub packages: Vec<String>,
}

pub struct InstallOrchestrator {
    effects: InstallEffects,
    executor: Executor,
}

impl InstallOrchestrator {
    #[must_use]
    pub fn new(effects: InstallEffects, executor: Executor) -> Self {
        Self { effects, executor }
    }

    /// Run all phases, waiting for any concurrent run on the same target.
    ///
    /// # Errors
    /// The first phase failure that cannot be recovered from.
    pub fn run(&self, request: &InstallRequest) -> Result<InstallReport, InstallError> {
        let layout = InstallLayout::new(&request.target);
        let lock_path = layout.lock_path();
        let _lock = InstallLock::acquire(&lock_path).map_err(|source| InstallError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        self.run_locked(request, &layout)
    }

    /// Like [`InstallOrchestrator::run`], but fails with
    /// [`InstallError::Busy`] instead of waiting.
    ///
    /// # Errors
    /// [`InstallError::Busy`] or any failure [`InstallOrchestrator::run`] reports.
    pub fn try_run(&self, request: &InstallRequest) -> Result<InstallReport, InstallError> {
        let layout = InstallLayout::new(&request.target);
        let lock_path = layout.lock_path();
        let lock = InstallLock::try_acquire(&lock_path).map_err(|source| InstallError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        let Some(_lock) = lock else {
            return Err(InstallError::Busy {
                target: request.target.clone(),
            });
        };
        self.run_locked(request, &layout)
    }

    /// Run once on a background thread; failures are logged, never panicked.
    ///
    /// # Errors
    /// Returns an error when the thread cannot be started.
    pub fn spawn(
        self,
        request: InstallRequest,
    ) -> io::Result<thread::JoinHandle<Result<InstallReport, InstallError>>> {
        thread::Builder::new()
            .name("nbx-install".into())
            .spawn(move || {
                let result = self.run(&request);
                if let Err(err) = &result {
                    warn!(path = %request.target.display(), error = %err, "background install failed");
                }
                result
            })
    }

    fn run_locked(
        &self,
        request: &InstallRequest,
        layout: &InstallLayout,
    ) -> Result<InstallReport, InstallError> {
        let progress = &self.effects.progress;
        progress.start();
        progress.switch_to_indeterminate();
        let result = self.run_phases(request, layout);
        match &result {
            Ok(report) if report.up_to_date && report.packages.is_empty() => {
                progress.finish(&format!("Node.js {} is up to date", report.version));
            }
            Ok(report) => progress.finish(&format!("Installed Node.js {}", report.version)),
            Err(err) => progress.finish(&format!("Install failed: {err}")),
        }
        result
    }

    fn run_phases(
        &self,
        request: &InstallRequest,
        layout: &InstallLayout,
    ) -> Result<InstallReport, InstallError> {
        let mut report = InstallReport {
            target: request.target.clone(),
            version: request.version.clone(),
            ..InstallReport::default()
        };
        self.ensure_runtime(request, layout, &mut report)?;
        if report.up_to_date && !request.refresh_packages {
            info!(version = %request.version, path = %request.target.display(), "bundled runtime is up to date");
            return Ok(report);
        }
        self.sync_packages(request, layout, &mut report)?;
        Ok(report)
    }

    fn ensure_runtime(
        &self,
        request: &InstallRequest,
        layout: &InstallLayout,
        report: &mut InstallReport,
    ) -> Result<(), InstallError> {
        let target = layout.target();
        if integrity::check(target, &request.version) {
            report.up_to_date = true;
            return Ok(());
        }

        let parent = target.parent().ok_or_else(|| InstallError::Layout {
            path: target.to_path_buf(),
            source: "install target has no parent directory".into(),
        })?;
        let downloader = &self.effects.downloader;
        self.effects
            .progress
            .message(&format!("Downloading Node.js {}", request.version));
        let fetched = downloader
            .fetch(&request.version, parent)
            .map_err(|err| InstallError::Download {
                version: request.version.clone(),
                source: err.into(),
            })?;
        report.fetched = true;
        info!(binary = %fetched.display(), "node runtime fetched");

        let binary = self.normalize_layout(target, fetched, report);

        integrity::update(target, &request.version).map_err(|err| InstallError::Integrity {
            target: target.to_path_buf(),
            source: err.into(),
        })?;

        if let Some(binary) = &binary {
            let settings = &self.effects.settings;
            if settings.is_path_valid() {
                debug!("configured runtime is valid; leaving it in place");
            } else {
                settings
                    .set_runtime_path(&binary.display().to_string())
                    .map_err(|err| InstallError::Settings { source: err.into() })?;
                report.configured = true;
                info!(binary = %binary.display(), "configured bundled runtime");
            }
        }
        report.binary = binary;
        Ok(())
    }

    /// Move the fetched installation onto `target`; the binary to use next.
    fn normalize_layout(
        &self,
        target: &Path,
        fetched: PathBuf,
        report: &mut InstallReport,
    ) -> Option<PathBuf> {
        let downloader = &self.effects.downloader;
        let Some(root) = downloader
            .locate_installation_root(&fetched)
            .filter(|root| root.is_dir() && root != target)
        else {
            return Some(fetched);
        };
        if atomic_move(&root, target) {
            report.moved = true;
            downloader.locate_binary_in_installation(target)
        } else {
            warn!(from = %root.display(), to = %target.display(), "keeping runtime at its download location");
            Some(fetched)
        }
    }

    fn sync_packages(
        &self,
        request: &InstallRequest,
        layout: &InstallLayout,
        report: &mut InstallReport,
    ) -> Result<(), InstallError> {
        let target = layout.target();
        if !target.exists() {
            debug!(path = %target.display(), "no install target; skipping packages");
            return Ok(());
        }
        let modules = layout.modules_dir();
        std::fs::create_dir_all(&modules).map_err(|source| InstallError::Modules {
            path: modules.clone(),
            source,
        })?;
        if request.packages.is_empty() {
            return Ok(());
        }

        let binary = self
            .effects
            .downloader
            .locate_binary_in_installation(target)
            .ok_or_else(|| InstallError::MissingRuntime {
                target: target.to_path_buf(),
            })?;
        let runtime = RuntimeHandle::new(binary);
        let prefix = target.display().to_string();
        let progress = &self.effects.progress;
        progress.switch_to_determinate(request.packages.len());
        for (index, package) in request.packages.iter().enumerate() {
            progress.message(&format!("Installing {package}"));
            self.npm(&runtime, "install", &prefix, package)?;
            progress.message(&format!("Updating {package}"));
            self.npm(&runtime, "update", &prefix, package)?;
            let installed = layout.package_dir(package);
            if !installed.is_dir() {
                warn!(package, path = %installed.display(), "npm left no package directory");
            }
            progress.advance(index + 1);
            report.packages.push(package.to_string());
        }
        Ok(())
    }

    fn npm(
        &self,
        runtime: &RuntimeHandle,
        command: &str,
        prefix: &str,
        package: &str,
    ) -> Result<(), InstallError> {
        let args = [command, "--prefix", prefix, package].map(ToString::to_string);
        let stdout = self
            .executor
            .run_checked(runtime, ToolReference::NPM, Timeout::Unbounded, &args)
            .map_err(|source| InstallError::Package {
                package: package.to_string(),
                source,
            })?;
        debug!(package, command, output = %stdout, "npm finished");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use crate::test_support::{fake_runtime, read_log, FakeDownloader, RecordingProgress};
    use nbx_domain::INTEGRITY_MARKER_FILE;
    use serial_test::serial;
    use std::fs;

    const VERSION: &str = "v15.12.0";

    struct Harness {
        _temp: tempfile::TempDir,
        root: PathBuf,
        target: PathBuf,
        log: PathBuf,
        downloader: Arc<FakeDownloader>,
        settings: Arc<MemorySettings>,
        progress: Arc<RecordingProgress>,
    }

    impl Harness {
        fn new(configure: impl FnOnce(FakeDownloader, &Path) -> FakeDownloader) -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let root = temp.path().to_path_buf();
            let log = root.join("npm.log");
            let downloader = configure(FakeDownloader::new(&log), &root);
            Self {
                target: root.join("home/nodejs"),
                root,
                log,
                downloader: Arc::new(downloader),
                settings: Arc::new(MemorySettings::default()),
                progress: Arc::new(RecordingProgress::default()),
                _temp: temp,
            }
        }

        fn with_settings(mut self, settings: MemorySettings) -> Self {
            self.settings = Arc::new(settings);
            self
        }

        fn orchestrator(&self) -> InstallOrchestrator {
            InstallOrchestrator::new(
                InstallEffects {
                    downloader: self.downloader.clone(),
                    settings: self.settings.clone(),
                    progress: self.progress.clone(),
                },
                Executor::default(),
            )
        }

        fn request(&self) -> InstallRequest {
            InstallRequest::new(&self.target, VERSION)
        }

        fn npm_calls(&self) -> Vec<String> {
            read_log(&self.log)
        }
    }

    fn expected_calls(target: &Path, packages: &[&str]) -> Vec<String> {
        packages
            .iter()
            .flat_map(|package| {
                ["install", "update"]
                    .map(|command| format!("{command} --prefix {} {package}", target.display()))
            })
            .collect()
    }

    #[test]
    #[serial]
    fn installs_into_empty_target() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        let report = harness.orchestrator().run(&harness.request())?;

        assert!(report.fetched && report.moved && report.configured);
        let node = harness.target.join("bin/node");
        assert_eq!(report.binary.as_deref(), Some(node.as_path()));
        assert_eq!(
            fs::read_to_string(harness.target.join(INTEGRITY_MARKER_FILE))?,
            VERSION
        );
        assert_eq!(
            harness.settings.runtime_path(),
            Some(node.display().to_string())
        );
        assert_eq!(
            harness.npm_calls(),
            expected_calls(
                &harness.target,
                &["npm", "typescript", "typescript-language-server"]
            )
        );
        let layout = InstallLayout::new(&harness.target);
        for package in AuxiliaryPackageSet::bundled().iter() {
            assert!(layout.package_dir(package).is_dir(), "{package} missing");
        }
        assert_eq!(report.packages.len(), 3);

        let events = harness.progress.events();
        assert_eq!(events.first().map(String::as_str), Some("start"));
        for expected in ["determinate:3", "advance:1", "advance:2", "advance:3"] {
            assert!(events.iter().any(|event| event == expected), "{events:?}");
        }
        assert!(events
            .last()
            .is_some_and(|event| event.starts_with("finish:")));
        Ok(())
    }

    #[test]
    #[serial]
    fn second_run_skips_fetch_and_packages() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        let orchestrator = harness.orchestrator();
        orchestrator.run(&harness.request())?;
        let calls_after_first = harness.npm_calls().len();

        let report = orchestrator.run(&harness.request())?;
        assert!(report.up_to_date);
        assert!(!report.fetched && !report.moved && report.packages.is_empty());
        assert_eq!(harness.downloader.fetches(), 1);
        assert_eq!(harness.npm_calls().len(), calls_after_first);
        Ok(())
    }

    #[test]
    #[serial]
    fn refresh_reruns_packages_without_fetching() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        let orchestrator = harness.orchestrator();
        orchestrator.run(&harness.request())?;
        let report = orchestrator.run(&harness.request().refresh_packages(true))?;
        assert!(report.up_to_date);
        assert_eq!(report.packages.len(), 3);
        assert_eq!(harness.downloader.fetches(), 1);
        assert_eq!(harness.npm_calls().len(), 12);
        Ok(())
    }

    #[test]
    #[serial]
    fn stale_marker_triggers_reinstall() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        fs::create_dir_all(harness.target.join("node_modules/leftover"))?;
        fs::write(harness.target.join(INTEGRITY_MARKER_FILE), "v14.0.0")?;

        let report = harness.orchestrator().run(&harness.request())?;
        assert!(report.fetched && report.moved);
        assert!(integrity::check(&harness.target, VERSION));
        assert!(!harness.target.join("node_modules/leftover").exists());
        Ok(())
    }

    #[test]
    #[serial]
    fn valid_configuration_is_never_overridden() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        let existing = fake_runtime(&harness.root.join("system"), "v18.0.0")?;
        let configured = existing.node.display().to_string();
        let harness = harness.with_settings(MemorySettings::with_path(configured.clone()));

        let report = harness.orchestrator().run(&harness.request())?;
        assert!(!report.configured);
        assert_eq!(harness.settings.runtime_path(), Some(configured));
        Ok(())
    }

    #[test]
    #[serial]
    fn invalid_configuration_is_replaced() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader)
            .with_settings(MemorySettings::with_path("/definitely/not/here/node"));
        let report = harness.orchestrator().run(&harness.request())?;
        assert!(report.configured);
        assert_eq!(
            harness.settings.runtime_path(),
            Some(harness.target.join("bin/node").display().to_string())
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn package_failure_aborts_remaining_packages() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader.failing_package("typescript"));
        let err = harness.orchestrator().run(&harness.request()).unwrap_err();
        match &err {
            InstallError::Package { package, .. } => assert_eq!(package, "typescript"),
            other => panic!("unexpected error {other:?}"),
        }
        let mut expected = expected_calls(&harness.target, &["npm"]);
        expected.push(format!(
            "install --prefix {} typescript",
            harness.target.display()
        ));
        assert_eq!(harness.npm_calls(), expected);
        assert!(integrity::check(&harness.target, VERSION));
        assert!(harness
            .progress
            .events()
            .iter()
            .any(|event| event.starts_with("finish:Install failed")));
        Ok(())
    }

    #[test]
    #[serial]
    fn failed_move_keeps_the_downloaded_binary() -> anyhow::Result<()> {
        // Renaming a directory into its own descendant always fails.
        let harness = Harness::new(|downloader, root| downloader.reporting_root(root));
        let request = harness
            .request()
            .with_packages(AuxiliaryPackageSet::new(Vec::<String>::new()));
        let report = harness.orchestrator().run(&request)?;

        let fetched = harness.root.join(format!("home/node-{VERSION}-fake/bin/node"));
        assert!(report.fetched);
        assert!(!report.moved);
        assert_eq!(report.binary.as_deref(), Some(fetched.as_path()));
        assert_eq!(
            harness.settings.runtime_path(),
            Some(fetched.display().to_string())
        );
        assert!(integrity::check(&harness.target, VERSION));
        assert!(harness.target.join("node_modules").is_dir());
        Ok(())
    }

    #[test]
    #[serial]
    fn download_failure_leaves_no_marker() {
        let harness = Harness::new(|downloader, _| downloader.failing_fetch());
        let err = harness.orchestrator().run(&harness.request()).unwrap_err();
        assert!(matches!(err, InstallError::Download { .. }), "{err:?}");
        assert!(!harness.target.join(INTEGRITY_MARKER_FILE).exists());
        assert_eq!(harness.settings.runtime_path(), None);
        assert!(harness.npm_calls().is_empty());
    }

    #[test]
    #[serial]
    fn marker_write_failure_is_fatal() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        fs::create_dir_all(harness.target.parent().expect("parent"))?;
        fs::write(&harness.target, "occupied")?;
        let err = harness.orchestrator().run(&harness.request()).unwrap_err();
        assert!(matches!(err, InstallError::Integrity { .. }), "{err:?}");
        assert_eq!(harness.settings.runtime_path(), None);
        Ok(())
    }

    #[test]
    #[serial]
    fn concurrent_run_reports_busy() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        let lock_path = InstallLayout::new(&harness.target).lock_path();
        let _held = InstallLock::try_acquire(&lock_path)?.expect("lock should be free");
        let err = harness.orchestrator().try_run(&harness.request()).unwrap_err();
        assert!(matches!(err, InstallError::Busy { .. }), "{err:?}");
        assert_eq!(harness.downloader.fetches(), 0);
        Ok(())
    }

    #[test]
    #[serial]
    fn spawn_runs_in_background_and_returns_report() -> anyhow::Result<()> {
        let harness = Harness::new(|downloader, _| downloader);
        let handle = harness.orchestrator().spawn(harness.request())?;
        assert_eq!(handle.thread().name(), Some("nbx-install"));
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("install thread panicked"))??;
        assert!(report.fetched);
        assert!(integrity::check(&harness.target, VERSION));
        Ok(())
    }
}
