//! Constants and configuration values for Foodlog
//!
//! Centralizes magic numbers, file naming and configuration defaults.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/foodlog";

    /// Daemon settings file inside [`CONFIG_DIR`]
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Environment variable overriding the settings file location
    pub const CONFIG_ENV: &str = "FOODLOG_CONFIG";

    /// Default Unix socket of the daemon
    pub const SOCKET_PATH: &str = "/run/foodlog.sock";

    /// Environment variable overriding the socket path for clients
    pub const SOCKET_ENV: &str = "FOODLOG_SOCKET";

    /// Base directory of Linux IIO devices
    pub const IIO_DEVICES: &str = "/sys/bus/iio/devices";

    /// Resolve the settings path: `$FOODLOG_CONFIG` or `/etc/foodlog/settings.json`
    pub fn settings_path() -> std::path::PathBuf {
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => std::path::PathBuf::from(p),
            _ => std::path::Path::new(CONFIG_DIR).join(SETTINGS_FILE),
        }
    }

    /// Resolve the socket path: `$FOODLOG_SOCKET` or the default
    pub fn socket_path() -> std::path::PathBuf {
        match std::env::var(SOCKET_ENV) {
            Ok(p) if !p.trim().is_empty() => std::path::PathBuf::from(p),
            _ => std::path::PathBuf::from(SOCKET_PATH),
        }
    }
}

/// Log partition layout
pub mod partition {
    /// Default directory holding the hourly partitions
    pub const DEFAULT_DIRECTORY: &str = "Food_sensor_values";

    /// File name prefix: `Food_<YYYYMMDD>_<HH>.csv`
    pub const PREFIX: &str = "Food";

    /// File extension
    pub const EXTENSION: &str = "csv";

    /// Column header written once per partition
    pub const HEADER: [&str; 2] = ["Timestamp", "Distance (mm)"];

    /// chrono format of the date/hour part of a partition name
    pub const NAME_TIME_FORMAT: &str = "%Y%m%d_%H";

    /// chrono format of the timestamp column (one-second granularity)
    pub const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// Calibration record stored alongside the partitions
    pub const CALIBRATION_FILE: &str = "calibration.json";
}

/// Sampling loop
pub mod sampling {
    use super::Duration;

    /// Fixed pause between ticks
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Default poll interval in milliseconds (settings file)
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

    /// Lower bound for a configured poll interval
    pub const MIN_POLL_INTERVAL_MS: u64 = 50;

    /// Value logged when the sensor could not be read
    pub const SENTINEL_MM: f64 = 0.0;

    /// Label reported to sinks with every reading
    pub const READING_LABEL: &str = "Food Sensor";

    /// Log an error at the first failure and then every N consecutive failures
    pub const ERROR_LOG_EVERY: u64 = 10;
}

/// Recent readings read-out
pub mod recent {
    /// Number of entries kept for consumers
    pub const DEFAULT_CAPACITY: usize = 10;
}

/// Linux IIO proximity/distance attributes
pub mod iio {
    /// Kernel driver name of the VL53L0X time-of-flight sensor
    pub const DEFAULT_DEVICE_NAME: &str = "vl53l0x";

    /// Raw distance channel
    pub const DISTANCE_RAW: &str = "in_distance_raw";

    /// Optional scale applied to the raw channel
    pub const DISTANCE_SCALE: &str = "in_distance_scale";

    /// Device name attribute
    pub const NAME: &str = "name";
}

/// Simulated sensor defaults
pub mod simulated {
    pub const MIN_MM: f64 = 20.0;
    pub const MAX_MM: f64 = 30.0;
}
