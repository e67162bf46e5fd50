use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::downloader::Downloader;
use crate::node_dist::NodeDistDownloader;
use crate::settings::{FileSettings, Settings};

/// Collaborators a command needs from the outside world.
pub trait Effects: Send + Sync {
    fn downloader(&self) -> Arc<dyn Downloader>;
    fn settings(&self) -> Arc<dyn Settings>;
}

pub type SharedEffects = Arc<dyn Effects>;

pub struct SystemEffects {
    downloader: Arc<NodeDistDownloader>,
    settings: Arc<FileSettings>,
}

impl SystemEffects {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            downloader: Arc::new(NodeDistDownloader::new(
                &config.node().dist_url,
                config.network().online,
            )?),
            settings: Arc::new(FileSettings::new(config.settings_path())),
        })
    }
}

impl Effects for SystemEffects {
    fn downloader(&self) -> Arc<dyn Downloader> {
        self.downloader.clone()
    }

    fn settings(&self) -> Arc<dyn Settings> {
        self.settings.clone()
    }
}
