// Manager Configuration
//
// Persisted settings for the session manager: consent, thread budget policy,
// timing knobs and storage locations. Stored as JSON under the user's config
// directory; a missing file yields defaults.

use crate::budget::BudgetMode;
use crate::error::Result;
use crate::types::PerformancePreset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const APP_DIR_NAME: &str = "hashwarden";

const LOG_CAPACITY_MIN: usize = 500;
const LOG_CAPACITY_MAX: usize = 2000;
const POLL_INTERVAL_MIN_MS: u64 = 1000;
const POLL_INTERVAL_MAX_MS: u64 = 2000;
const HTTP_TIMEOUT_MIN_MS: u64 = 2000;
const HTTP_TIMEOUT_MAX_MS: u64 = 5000;

/// What to do when (coin, pool, wallet) is already being mined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Warn,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BudgetSettings {
    #[serde(default)]
    pub mode: BudgetMode,
    #[serde(default)]
    pub preset: PerformancePreset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub consent: bool,
    pub budget: BudgetSettings,
    pub duplicate_policy: DuplicatePolicy,
    pub log_capacity: usize,
    pub poll_interval_ms: u64,
    pub http_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub batch_interval_ms: u64,
    pub suspend_with_signal: bool,
    pub hashrate_drop_threshold_pct: f64,
    pub bin_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub checksums_file: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            consent: false,
            budget: BudgetSettings::default(),
            duplicate_policy: DuplicatePolicy::Warn,
            log_capacity: 1000,
            poll_interval_ms: 1000,
            http_timeout_ms: 3000,
            shutdown_timeout_ms: 3000,
            batch_interval_ms: 1000,
            suspend_with_signal: false,
            hashrate_drop_threshold_pct: 30.0,
            bin_dir: None,
            data_dir: None,
            checksums_file: None,
        }
    }
}

impl ManagerConfig {
    /// Default location: `<config_dir>/hashwarden/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("no config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: ManagerConfig = serde_json::from_str(&content)?;
        Ok(config.normalized())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Clamp tunables into their supported ranges
    pub fn normalized(mut self) -> Self {
        self.log_capacity = self.log_capacity.clamp(LOG_CAPACITY_MIN, LOG_CAPACITY_MAX);
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(POLL_INTERVAL_MIN_MS, POLL_INTERVAL_MAX_MS);
        self.http_timeout_ms = self
            .http_timeout_ms
            .clamp(HTTP_TIMEOUT_MIN_MS, HTTP_TIMEOUT_MAX_MS);
        if !(0.0..100.0).contains(&self.hashrate_drop_threshold_pct) {
            self.hashrate_drop_threshold_pct = 30.0;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Directory for recovery record and history
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR_NAME)
        })
    }

    /// Directory holding miner binaries
    pub fn bin_dir(&self) -> PathBuf {
        self.bin_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("bin"))
    }
}
