//! Pipeline configuration loaded from `srintake.toml`.
//!
//! Every key is optional; missing keys fall back to the defaults below.
//! `SRINTAKE_WATCH_DIR` takes precedence over the file for the watched directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "srintake.toml";

/// Top-level configuration for one pipeline instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Directory watched for incoming work-order files.
    pub watch_dir: PathBuf,

    /// Where processed files are moved.
    pub archive_dir: PathBuf,

    /// Line-oriented log of completed SR numbers.
    pub processed_log: PathBuf,

    /// PID lock file guarding the pipeline.
    pub lock_file: PathBuf,

    /// Directory holding the persistent activity log.
    pub log_dir: PathBuf,

    /// Collector executable name.
    pub collector_tool: String,

    /// Playbook passed to the collector via `--playbook`.
    pub playbook: String,

    pub collector_max_attempts: u32,
    pub collector_retry_delay_secs: u64,

    pub sync_max_attempts: u32,
    pub sync_retry_delay_secs: u64,

    /// Pause between scans in watch mode.
    pub watch_interval_secs: u64,

    /// Archive entries older than this are removed by `--cleanup`.
    pub retention_days: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("incoming"),
            archive_dir: PathBuf::from("archive"),
            processed_log: PathBuf::from("processed.log"),
            lock_file: PathBuf::from("srintake.lock"),
            log_dir: PathBuf::from("logs"),
            collector_tool: "lc-collector".to_string(),
            playbook: "lc-fc.playbook".to_string(),
            collector_max_attempts: 3,
            collector_retry_delay_secs: 5,
            sync_max_attempts: 3,
            sync_retry_delay_secs: 5,
            watch_interval_secs: 30,
            retention_days: 30,
        }
    }
}

impl IntakeConfig {
    /// Loads configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<IntakeConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("SRINTAKE_WATCH_DIR")
            && !dir.is_empty()
        {
            config.watch_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn collector_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.collector_max_attempts,
            Duration::from_secs(self.collector_retry_delay_secs),
        )
    }

    pub fn sync_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.sync_max_attempts,
            Duration::from_secs(self.sync_retry_delay_secs),
        )
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }
}
