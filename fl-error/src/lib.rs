//! Unified error handling for Foodlog
//!
//! This crate provides the single error type shared by the sensor core,
//! the daemon and the CLI client.

use std::io;
use std::path::PathBuf;

/// Result type alias using FoodlogError
pub type Result<T> = std::result::Result<T, FoodlogError>;

/// Unified error type for all Foodlog operations
#[derive(thiserror::Error, Debug)]
pub enum FoodlogError {
    // ============================================================================
    // I/O and Storage Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    /// A log partition could not be created or appended to
    #[error("Storage fault on {path}: {source}")]
    Storage {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Sensor Errors
    // ============================================================================
    #[error("Sensor fault: {0}")]
    Sensor(#[from] SensorFault),

    #[error("Calibration failed: {0}")]
    Calibration(SensorFault),

    #[error("Sensor device not found: {0}")]
    DeviceNotFound(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Controller Lifecycle Errors
    // ============================================================================
    #[error("Sensor loop is already running")]
    AlreadyRunning,

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon not available at {0}")]
    DaemonNotAvailable(PathBuf),

    #[error("Daemon request failed: {0}")]
    DaemonRequest(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

/// A failed read from the range sensor.
///
/// Transient by nature (bus error, timeout, out-of-range); the polling loop
/// recovers from it locally.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SensorFault {
    #[error("bus error: {0}")]
    Bus(String),

    #[error("read timed out")]
    Timeout,

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("no measurement available")]
    NoData,
}

impl FoodlogError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config value error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error for a partition path
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create a daemon error from a string
    pub fn daemon(msg: impl Into<String>) -> Self {
        Self::DaemonRequest(msg.into())
    }

    /// True for faults that only affect a single tick of the polling loop
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

// Allow converting from String to FoodlogError
impl From<String> for FoodlogError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FoodlogError
impl From<&str> for FoodlogError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_error_names_the_fault() {
        let err = FoodlogError::Calibration(SensorFault::Timeout);
        assert_eq!(err.to_string(), "Calibration failed: read timed out");
    }

    #[test]
    fn test_storage_helper() {
        let err = FoodlogError::storage(
            "/tmp/Food_20240101_13.csv",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_storage());
        assert!(err.to_string().contains("Food_20240101_13.csv"));
    }

    #[test]
    fn test_sensor_fault_converts() {
        let err: FoodlogError = SensorFault::NoData.into();
        assert!(matches!(err, FoodlogError::Sensor(SensorFault::NoData)));
    }
}
