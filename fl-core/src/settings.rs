//! Daemon Settings
//!
//! Persistent settings stored as JSON in /etc/foodlog/settings.json
//! (or the file named by `FOODLOG_CONFIG` / `--config`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{iio, partition, paths, recent, sampling, simulated};
use crate::error::{FoodlogError, Result};

/// Settings of one feeding-station daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Identifier of the cage this station belongs to
    #[serde(default = "default_cage_id")]
    pub cage_id: String,

    /// Directory receiving the hourly CSV partitions
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,

    /// Pause between ticks in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub sensor: SensorSettings,

    /// What to do when a row cannot be written
    #[serde(default)]
    pub storage_failure_policy: StorageFailurePolicy,

    /// Optional JSON-lines file receiving every reading
    #[serde(default)]
    pub telemetry_path: Option<PathBuf>,

    /// Number of readings kept for the `recent` request
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// Unix socket of the control server
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Start sampling as soon as the daemon is up
    #[serde(default = "default_true")]
    pub autostart: bool,
}

/// Where distances come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorSettings {
    /// Linux IIO device, looked up by driver name unless a path is given
    Iio {
        #[serde(default = "default_device_name")]
        device_name: String,
        #[serde(default)]
        device_path: Option<PathBuf>,
    },
    /// Random readings for running without hardware
    Simulated {
        #[serde(default = "default_sim_min")]
        min_mm: f64,
        #[serde(default = "default_sim_max")]
        max_mm: f64,
        #[serde(default)]
        fault_rate: f64,
    },
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self::Iio {
            device_name: default_device_name(),
            device_path: None,
        }
    }
}

/// Handling of a failed partition write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFailurePolicy {
    /// Drop the row, report the error and keep polling
    #[default]
    SkipTick,
    /// Retry the write once before dropping the row
    RetryOnce,
}

fn default_cage_id() -> String { "cage-1".to_string() }
fn default_log_directory() -> PathBuf { PathBuf::from(partition::DEFAULT_DIRECTORY) }
fn default_poll_interval() -> u64 { sampling::DEFAULT_POLL_INTERVAL_MS }
fn default_recent_capacity() -> usize { recent::DEFAULT_CAPACITY }
fn default_socket_path() -> PathBuf { PathBuf::from(paths::SOCKET_PATH) }
fn default_device_name() -> String { iio::DEFAULT_DEVICE_NAME.to_string() }
fn default_sim_min() -> f64 { simulated::MIN_MM }
fn default_sim_max() -> f64 { simulated::MAX_MM }
fn default_true() -> bool { true }

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            cage_id: default_cage_id(),
            log_directory: default_log_directory(),
            poll_interval_ms: default_poll_interval(),
            sensor: SensorSettings::default(),
            storage_failure_policy: StorageFailurePolicy::default(),
            telemetry_path: None,
            recent_capacity: default_recent_capacity(),
            socket_path: default_socket_path(),
            autostart: true,
        }
    }
}

impl DaemonSettings {
    /// Poll interval, never below the minimum
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(sampling::MIN_POLL_INTERVAL_MS))
    }

    /// Calibration record kept next to the partitions
    pub fn calibration_path(&self) -> PathBuf {
        self.log_directory.join(partition::CALIBRATION_FILE)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.cage_id.trim().is_empty() {
            return Err(FoodlogError::invalid_config("cage_id", "must not be empty"));
        }
        if self.log_directory.as_os_str().is_empty() {
            return Err(FoodlogError::invalid_config("log_directory", "must not be empty"));
        }
        if self.recent_capacity == 0 {
            return Err(FoodlogError::invalid_config("recent_capacity", "must be at least 1"));
        }
        if let SensorSettings::Simulated { min_mm, max_mm, fault_rate } = &self.sensor {
            if !min_mm.is_finite() || !max_mm.is_finite() || min_mm >= max_mm {
                return Err(FoodlogError::invalid_config(
                    "sensor",
                    format!("simulated range {}..{} is empty", min_mm, max_mm),
                ));
            }
            if !(0.0..=1.0).contains(fault_rate) {
                return Err(FoodlogError::invalid_config(
                    "sensor.fault_rate",
                    format!("{} is outside 0..=1", fault_rate),
                ));
            }
        }
        Ok(())
    }
}

/// Load settings from a JSON file; a missing file yields the defaults
pub fn load_settings(path: &Path) -> Result<DaemonSettings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(DaemonSettings::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        FoodlogError::config(format!("Failed to read settings file {:?}: {}", path, e))
    })?;

    let settings: DaemonSettings = serde_json::from_str(&content).map_err(|e| {
        FoodlogError::config(format!("Failed to parse settings JSON: {}", e))
    })?;

    info!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to a JSON file
/// Atomic write: temp file, sync, rename
pub fn save_settings(path: &Path, settings: &DaemonSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                FoodlogError::config(format!("Failed to create config directory: {}", e))
            })?;
        }
    }

    let json = serde_json::to_string_pretty(settings).map_err(|e| {
        FoodlogError::config(format!("Failed to serialize settings: {}", e))
    })?;

    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|e| {
        FoodlogError::config(format!("Failed to create temp file: {}", e))
    })?;

    file.write_all(json.as_bytes()).map_err(|e| {
        FoodlogError::config(format!("Failed to write to temp file: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        FoodlogError::config(format!("Failed to sync temp file: {}", e))
    })?;

    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        FoodlogError::config(format!("Failed to rename temp file: {}", e))
    })?;

    Ok(())
}
