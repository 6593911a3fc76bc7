use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::sync::SyncOptions;

/// Settings read from `kiosk-sync.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device endpoint returning `{"setup": ...}`
    pub endpoint: Option<Url>,

    /// Directory holding downloaded assets
    pub cache_dir: PathBuf,

    /// Where the manifest is persisted; defaults to `setup.json` in the cache
    pub manifest_path: Option<PathBuf>,

    /// Device API key
    pub api_key: Option<String>,

    pub sync: SyncConfig,

    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_concurrent: usize,
    pub request_timeout_secs: u64,
    /// Bound on a whole asset download
    pub download_timeout_secs: u64,
    /// Seconds between unattended refreshes in `run` mode
    pub refresh_interval_secs: u64,
    pub prune_orphans: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            cache_dir: PathBuf::from("kiosk-cache"),
            manifest_path: None,
            api_key: None,
            sync: SyncConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            request_timeout_secs: 20,
            download_timeout_secs: 20,
            refresh_interval_secs: 300,
            prune_orphans: true,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrent: self.sync.max_concurrent.max(1),
            request_timeout: Duration::from_secs(self.sync.request_timeout_secs),
            prune_orphans: self.sync.prune_orphans,
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.download_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.sync.refresh_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.poll_interval_secs.max(1))
    }
}
