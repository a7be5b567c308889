//! Calibration offset
//!
//! A single signed offset is added to every raw reading. Calibrating against
//! a known distance performs one raw read and sets
//! `offset = known_distance - raw`, so the very next raw value equal to the
//! calibration read comes out as exactly `known_distance`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FoodlogError, Result};
use crate::sensor::RangeSensor;

/// Offset applied to every raw reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    offset_mm: f64,
    initialized_at: NaiveDateTime,
}

impl CalibrationState {
    /// Zero offset
    pub fn new(now: NaiveDateTime) -> Self {
        Self::with_offset(0.0, now)
    }

    pub fn with_offset(offset_mm: f64, initialized_at: NaiveDateTime) -> Self {
        Self {
            offset_mm,
            initialized_at,
        }
    }

    pub fn offset_mm(&self) -> f64 {
        self.offset_mm
    }

    /// When the offset was last set
    pub fn initialized_at(&self) -> NaiveDateTime {
        self.initialized_at
    }

    /// `raw + offset`
    pub fn apply(&self, raw_mm: f64) -> f64 {
        raw_mm + self.offset_mm
    }

    /// Take one raw reading and derive the offset from a ground-truth distance.
    ///
    /// A failed read leaves the previous offset untouched and returns
    /// [`FoodlogError::Calibration`].
    pub fn calibrate(
        &mut self,
        sensor: &mut dyn RangeSensor,
        known_distance_mm: f64,
        now: NaiveDateTime,
    ) -> Result<f64> {
        if !known_distance_mm.is_finite() {
            return Err(FoodlogError::invalid_config(
                "known_distance_mm",
                format!("must be finite, got {}", known_distance_mm),
            ));
        }

        let raw = match sensor.read() {
            Ok(raw) => raw,
            Err(fault) => {
                warn!(
                    offset = self.offset_mm,
                    "Calibration read failed: {} - keeping previous offset", fault
                );
                return Err(FoodlogError::Calibration(fault));
            }
        };

        self.offset_mm = known_distance_mm - raw;
        self.initialized_at = now;
        info!(
            raw,
            known = known_distance_mm,
            "Calibration complete. Offset set to {} mm.", self.offset_mm
        );
        Ok(self.offset_mm)
    }

    pub fn to_record(&self, cage_id: &str) -> CalibrationRecord {
        CalibrationRecord {
            cage_id: cage_id.to_string(),
            offset_mm: self.offset_mm,
            calibrated_at: self.initialized_at,
        }
    }
}

impl From<&CalibrationRecord> for CalibrationState {
    fn from(record: &CalibrationRecord) -> Self {
        Self::with_offset(record.offset_mm, record.calibrated_at)
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Calibration saved next to the partitions so an offset survives restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub cage_id: String,
    pub offset_mm: f64,
    pub calibrated_at: NaiveDateTime,
}

/// Where a controller keeps its calibration record
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, `None` if none was saved yet
    pub fn load(&self) -> Result<Option<CalibrationRecord>> {
        if !self.path.exists() {
            debug!("No calibration record at {:?}", self.path);
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| FoodlogError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        let record: CalibrationRecord = serde_json::from_str(&contents)?;

        if !record.offset_mm.is_finite() {
            return Err(FoodlogError::invalid_config("offset_mm", "stored offset is not finite"));
        }

        info!(offset = record.offset_mm, "Loaded calibration from {:?}", self.path);
        Ok(Some(record))
    }

    /// Atomic write - temp file then rename
    pub fn save(&self, record: &CalibrationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(record)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .map_err(|e| FoodlogError::FileWrite { path: temp_path.clone(), source: e })?;
        file.write_all(json.as_bytes())
            .map_err(|e| FoodlogError::FileWrite { path: temp_path.clone(), source: e })?;
        file.sync_all()
            .map_err(|e| FoodlogError::FileWrite { path: temp_path.clone(), source: e })?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .map_err(|e| FoodlogError::FileWrite { path: self.path.clone(), source: e })?;

        debug!("Saved calibration to {:?}", self.path);
        Ok(())
    }
}
