//! Reading sinks
//!
//! Every tick reports `(value, label)` to a sink, independently of the CSV
//! partitions. Sinks are best effort: they cannot fail the loop, so the trait
//! method returns nothing and implementations log their own problems.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::json;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::recent::{RecentReading, RecentReadings};
use crate::rotator::LogFileRotator;

/// Side-channel consumer of readings
pub trait ReadingSink: Send + Sync {
    fn report_data(&self, value: f64, label: &str);

    /// Report a reading together with the row timestamp it was logged under.
    /// Sinks that keep timestamps override this; the rest ignore it.
    fn report_reading(&self, timestamp: &str, value: f64, label: &str) {
        let _ = timestamp;
        self.report_data(value, label);
    }
}

impl<S: ReadingSink + ?Sized> ReadingSink for Arc<S> {
    fn report_data(&self, value: f64, label: &str) {
        (**self).report_data(value, label)
    }

    fn report_reading(&self, timestamp: &str, value: f64, label: &str) {
        (**self).report_reading(timestamp, value, label)
    }
}

/// Reports to the tracing output
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ReadingSink for ConsoleSink {
    fn report_data(&self, value: f64, label: &str) {
        info!(target: "foodlog::reading", "{}: {}", label, value);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReadingSink for NullSink {
    fn report_data(&self, _value: f64, _label: &str) {}
}

/// Reports to several sinks in order
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Arc<dyn ReadingSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReadingSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReadingSink for Fanout {
    fn report_data(&self, value: f64, label: &str) {
        for sink in &self.sinks {
            sink.report_data(value, label);
        }
    }

    fn report_reading(&self, timestamp: &str, value: f64, label: &str) {
        for sink in &self.sinks {
            sink.report_reading(timestamp, value, label);
        }
    }
}

// ============================================================================
// Recent readings
// ============================================================================

/// Feeds the bounded recent-readings buffer.
///
/// Entries carry the tick's row timestamp; `report_data` alone falls back to
/// the sink's clock.
pub struct RecentSink {
    buffer: Arc<Mutex<RecentReadings>>,
    clock: Arc<dyn Clock>,
}

impl RecentSink {
    pub fn new(buffer: Arc<Mutex<RecentReadings>>, clock: Arc<dyn Clock>) -> Self {
        Self { buffer, clock }
    }
}

impl ReadingSink for RecentSink {
    fn report_data(&self, value: f64, _label: &str) {
        let timestamp = LogFileRotator::format_timestamp(self.clock.now());
        self.buffer.lock().push(RecentReading { timestamp, value });
    }

    fn report_reading(&self, timestamp: &str, value: f64, _label: &str) {
        self.buffer.lock().push(RecentReading {
            timestamp: timestamp.to_string(),
            value,
        });
    }
}

// ============================================================================
// JSON-lines telemetry
// ============================================================================

/// Appends `{"ts_ms", "event", "data"}` lines to a telemetry file
pub struct TelemetryLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

impl TelemetryLog {
    /// Open (or create) the telemetry file. An unopenable file is retried on
    /// every report instead of failing construction.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = Self::open_file(&path);
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> Option<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                warn!("Cannot open telemetry log {:?}: {}", path, e);
                None
            }
        }
    }

    /// Write one event line
    pub fn log_event(&self, event: &str, data: serde_json::Value) {
        let line = json!({
            "ts_ms": now_millis(),
            "event": event,
            "data": data,
        })
        .to_string();

        let mut guard = self.file.lock();
        if guard.is_none() {
            *guard = Self::open_file(&self.path);
        }
        if let Some(f) = guard.as_mut() {
            if let Err(e) = writeln!(f, "{}", line) {
                warn!("Telemetry write to {:?} failed: {}", self.path, e);
                // Reopen on the next event
                *guard = None;
            }
        }
    }
}

impl ReadingSink for TelemetryLog {
    fn report_data(&self, value: f64, label: &str) {
        self.log_event("reading", json!({ "label": label, "value": value }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(f64, String)>>);

    impl ReadingSink for Collect {
        fn report_data(&self, value: f64, label: &str) {
            self.0.lock().push((value, label.to_string()));
        }
    }

    #[test]
    fn test_fanout_reports_to_all() {
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        let fanout = Fanout::new().with(a.clone()).with(b.clone());

        fanout.report_data(12.0, "Food Sensor");
        assert_eq!(fanout.len(), 2);
        assert_eq!(a.0.lock().as_slice(), &[(12.0, "Food Sensor".to_string())]);
        assert_eq!(b.0.lock().len(), 1);
    }

    #[test]
    fn test_recent_sink_timestamps_entries() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(13, 59, 59).unwrap();
        let buffer = Arc::new(Mutex::new(RecentReadings::new(2)));
        let sink = RecentSink::new(buffer.clone(), Arc::new(ManualClock::new(start)));

        for v in [1.0, 2.0, 3.0] {
            sink.report_data(v, "Food Sensor");
        }

        let entries = buffer.lock().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value, 2.0);
        assert_eq!(entries[1].timestamp, "2024-01-01 13:59:59");
    }

    #[test]
    fn test_recent_sink_keeps_row_timestamp_through_fanout() {
        // Sink clock already past the second the row was logged under
        let later = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(14, 0, 0).unwrap();
        let buffer = Arc::new(Mutex::new(RecentReadings::new(10)));
        let collect = Arc::new(Collect::default());
        let fanout = Fanout::new()
            .with(Arc::new(RecentSink::new(buffer.clone(), Arc::new(ManualClock::new(later)))))
            .with(collect.clone());

        fanout.report_reading("2024-01-01 13:59:59", 41.0, "Food Sensor");

        let entries = buffer.lock().snapshot();
        assert_eq!(entries[0].timestamp, "2024-01-01 13:59:59");
        assert_eq!(entries[0].value, 41.0);
        assert_eq!(collect.0.lock().as_slice(), &[(41.0, "Food Sensor".to_string())]);
    }

    #[test]
    fn test_telemetry_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("telemetry").join("readings.jsonl");
        let log = TelemetryLog::open(&path);

        log.report_data(25.5, "Food Sensor");
        log.report_data(0.0, "Food Sensor");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "reading");
        assert_eq!(lines[0]["data"]["label"], "Food Sensor");
        assert_eq!(lines[0]["data"]["value"], 25.5);
    }
}
