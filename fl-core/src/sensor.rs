//! Range sensor access
//!
//! The controller only needs "something that can be read for a distance".
//! On Linux the I2C bus and the TCA9548A multiplexer are owned by the kernel
//! (`i2c-mux-pca954x`), and the VL53L0X is exposed through the IIO subsystem:
//!
//! - `/sys/bus/iio/devices/iio:deviceN/name` - driver name (`vl53l0x`)
//! - `in_distance_raw` - last measured distance
//! - `in_distance_scale` - meters per raw unit (0.001 for the VL53L0X)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace};

use crate::constants::iio;
use crate::error::{FoodlogError, Result, SensorFault};

/// Hardware abstraction returning an instantaneous distance in millimeters
#[cfg_attr(test, mockall::automock)]
pub trait RangeSensor: Send {
    /// Take one measurement. May fail transiently.
    fn read(&mut self) -> std::result::Result<f64, SensorFault>;

    /// Human readable description for status output
    fn describe(&self) -> String;
}

impl<S: RangeSensor + ?Sized> RangeSensor for Box<S> {
    fn read(&mut self) -> std::result::Result<f64, SensorFault> {
        (**self).read()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ============================================================================
// IIO sysfs sensor
// ============================================================================

/// Distance sensor read through the Linux IIO sysfs interface
#[derive(Debug, Clone)]
pub struct IioRangeSensor {
    device_dir: PathBuf,
    /// Millimeters per raw unit
    mm_per_unit: f64,
}

impl IioRangeSensor {
    /// Open an IIO device directory that exposes `in_distance_raw`
    pub fn open(device_dir: impl Into<PathBuf>) -> Result<Self> {
        let device_dir = device_dir.into();
        let raw = device_dir.join(iio::DISTANCE_RAW);
        if !raw.exists() {
            return Err(FoodlogError::DeviceNotFound(format!(
                "{} has no {} attribute",
                device_dir.display(),
                iio::DISTANCE_RAW
            )));
        }

        let mm_per_unit = read_scale(&device_dir.join(iio::DISTANCE_SCALE))?;
        info!(device = %device_dir.display(), mm_per_unit, "Opened IIO range sensor");

        Ok(Self {
            device_dir,
            mm_per_unit,
        })
    }

    /// Find the first IIO device under `base` whose driver name is `name`
    pub fn discover(base: &Path, name: &str) -> Result<Self> {
        let dir = find_iio_device(base, name)?;
        Self::open(dir)
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }
}

impl RangeSensor for IioRangeSensor {
    fn read(&mut self) -> std::result::Result<f64, SensorFault> {
        let path = self.device_dir.join(iio::DISTANCE_RAW);
        let content = fs::read_to_string(&path).map_err(io_fault)?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SensorFault::NoData);
        }

        let raw = trimmed
            .parse::<i64>()
            .map_err(|_| SensorFault::OutOfRange(format!("unparsable value '{}'", trimmed)))?;
        if raw < 0 {
            return Err(SensorFault::OutOfRange(format!("negative distance {}", raw)));
        }

        trace!(raw, "IIO distance read");
        Ok(raw as f64 * self.mm_per_unit)
    }

    fn describe(&self) -> String {
        format!("iio:{}", self.device_dir.display())
    }
}

/// Read `in_distance_scale` (meters per unit) and convert it to millimeters.
/// A missing scale attribute means the raw channel already reports millimeters.
fn read_scale(path: &Path) -> Result<f64> {
    if !path.exists() {
        return Ok(1.0);
    }

    let content = fs::read_to_string(path).map_err(|e| FoodlogError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let meters = content
        .trim()
        .parse::<f64>()
        .map_err(|e| FoodlogError::invalid_config(path.display().to_string(), e.to_string()))?;

    if !meters.is_finite() || meters <= 0.0 {
        return Err(FoodlogError::invalid_config(
            path.display().to_string(),
            format!("scale must be positive, got {}", meters),
        ));
    }

    Ok(meters * 1000.0)
}

fn io_fault(e: io::Error) -> SensorFault {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SensorFault::Timeout,
        _ => SensorFault::Bus(e.to_string()),
    }
}

/// Enumerate IIO devices and return the directory of the first one named `name`
pub fn find_iio_device(base: &Path, name: &str) -> Result<PathBuf> {
    debug!("Scanning IIO devices in {:?} for '{}'", base, name);

    let entries = fs::read_dir(base).map_err(|e| FoodlogError::FileRead {
        path: base.to_path_buf(),
        source: e,
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    // iio:device0 before iio:device1
    candidates.sort();

    for dir in candidates {
        let device_name = match fs::read_to_string(dir.join(iio::NAME)) {
            Ok(n) => n,
            Err(_) => continue,
        };
        trace!("IIO device {:?} is '{}'", dir, device_name.trim());
        if device_name.trim() == name {
            return Ok(dir);
        }
    }

    Err(FoodlogError::DeviceNotFound(format!(
        "no IIO device named '{}' under {}",
        name,
        base.display()
    )))
}

// ============================================================================
// Simulated sensor
// ============================================================================

/// Random distances for running without hardware
pub struct SimulatedRangeSensor {
    rng: StdRng,
    min_mm: f64,
    max_mm: f64,
    fault_rate: f64,
}

impl SimulatedRangeSensor {
    /// Uniform values in `min_mm..max_mm`; `fault_rate` in `0.0..=1.0`
    pub fn new(min_mm: f64, max_mm: f64, fault_rate: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), min_mm, max_mm, fault_rate)
    }

    /// Deterministic sequence for tests and demos
    pub fn seeded(seed: u64, min_mm: f64, max_mm: f64, fault_rate: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), min_mm, max_mm, fault_rate)
    }

    fn with_rng(rng: StdRng, min_mm: f64, max_mm: f64, fault_rate: f64) -> Self {
        let (min_mm, max_mm) = if min_mm <= max_mm { (min_mm, max_mm) } else { (max_mm, min_mm) };
        Self {
            rng,
            min_mm,
            max_mm,
            fault_rate: fault_rate.clamp(0.0, 1.0),
        }
    }
}

impl RangeSensor for SimulatedRangeSensor {
    fn read(&mut self) -> std::result::Result<f64, SensorFault> {
        if self.fault_rate > 0.0 && self.rng.gen_bool(self.fault_rate) {
            return Err(SensorFault::Bus("simulated bus error".to_string()));
        }
        if self.min_mm == self.max_mm {
            return Ok(self.min_mm);
        }
        Ok(self.rng.gen_range(self.min_mm..self.max_mm))
    }

    fn describe(&self) -> String {
        format!("simulated:{}..{}mm", self.min_mm, self.max_mm)
    }
}
