//! Runtime configuration, loadable from a TOML file with sensible defaults.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one monitored battery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// BLE advertising name of the BMS
    pub device_name: String,
    /// Path of the append-only CSV history log
    pub log_file: PathBuf,
    /// Seconds between poll cycles
    pub poll_interval_secs: u64,
    /// Milliseconds to wait after each request for the BMS to answer
    pub settle_delay_ms: u64,
    /// Seconds to wait for the device to appear during discovery
    pub scan_timeout_secs: u64,
    /// Seconds to wait between reconnection attempts
    pub backoff_secs: u64,
    /// Consecutive transport failures tolerated before giving up
    pub max_consecutive_failures: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: "JBD BMS DP04S007".to_string(),
            log_file: PathBuf::from("battery_log.csv"),
            poll_interval_secs: 60,
            settle_delay_ms: 500,
            scan_timeout_secs: 30,
            backoff_secs: 10,
            max_consecutive_failures: 10,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}
