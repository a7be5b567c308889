//! Foodlog Core Library
//!
//! Calibrated distance sampling for a food hopper, logged into hourly CSV
//! partitions.
//!
//! # Features
//!
//! - **Sensors**: VL53L0X through Linux IIO sysfs, or a simulated sensor
//! - **Calibration**: one signed offset derived from a known distance
//! - **Partitions**: `Food_<YYYYMMDD>_<HH>.csv`, one per wall-clock hour
//! - **Sampling loop**: start/stop lifecycle with cooperative cancellation
//! - **Sinks**: console, JSON-lines telemetry and a bounded recent buffer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fl_core::{ConsoleSink, ControllerConfig, SensorController, SimulatedRangeSensor};
//!
//! # async fn demo() -> fl_core::Result<()> {
//! let controller = SensorController::new(
//!     ControllerConfig::default(),
//!     Box::new(SimulatedRangeSensor::new(20.0, 30.0, 0.0)),
//!     Arc::new(ConsoleSink),
//! );
//! controller.calibrate(25.0)?;
//! controller.start_sensor().await?;
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod clock;
pub mod constants;
pub mod controller;
pub mod recent;
pub mod rotator;
pub mod sensor;
pub mod settings;
pub mod sink;

/// Error types shared with the daemon and the client
pub mod error {
    pub use fl_error::{FoodlogError, Result, SensorFault};
}

pub use calibration::{CalibrationRecord, CalibrationState, CalibrationStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{
    ControllerConfig, ControllerStats, ControllerStatus, RunState, RunToken, Sample,
    SensorController, TickReport,
};
pub use error::{FoodlogError, Result, SensorFault};
pub use recent::{BoundedBuffer, RecentReading, RecentReadings};
pub use rotator::{LogFileRotator, PartitionId};
pub use sensor::{find_iio_device, IioRangeSensor, RangeSensor, SimulatedRangeSensor};
pub use settings::{
    load_settings, save_settings, DaemonSettings, SensorSettings, StorageFailurePolicy,
};
pub use sink::{ConsoleSink, Fanout, NullSink, ReadingSink, RecentSink, TelemetryLog};
