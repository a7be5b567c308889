//! Sensor Controller
//!
//! Owns one sensor, its calibration offset and a partition directory, and
//! runs the sampling loop:
//!
//! 1. pick the partition for the current hour and make sure it has a header
//! 2. read the sensor and apply the offset (a fault logs the sentinel 0)
//! 3. append `(timestamp, value)` to the partition
//! 4. report the value to the sink
//! 5. sleep for the poll interval, or until stopped
//!
//! # Failure handling
//! - **Sensor faults** never leave the tick: they become [`Sample::Faulted`]
//! - **Storage faults** fail the tick only, after the configured
//!   [`StorageFailurePolicy`]; the loop keeps running
//! - **Error counting**: consecutive failures are logged on the first
//!   occurrence and then every 10th

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::calibration::{CalibrationState, CalibrationStore};
use crate::clock::{Clock, SystemClock};
use crate::constants::{partition, sampling};
use crate::error::{FoodlogError, Result, SensorFault};
use crate::rotator::{LogFileRotator, PartitionId};
use crate::sensor::RangeSensor;
use crate::settings::{DaemonSettings, StorageFailurePolicy};
use crate::sink::ReadingSink;

/// Outcome of one sensor read
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Calibrated distance in millimeters
    Measured(f64),
    /// The read failed; the sentinel is logged in its place
    Faulted(SensorFault),
}

impl Sample {
    /// Value written to the partition and reported to the sink
    pub fn logged_value(&self) -> f64 {
        match self {
            Sample::Measured(v) => *v,
            Sample::Faulted(_) => sampling::SENTINEL_MM,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Sample::Faulted(_))
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub partition: PartitionId,
    /// The partition was created (with its header) by this tick
    pub created_partition: bool,
    pub timestamp: String,
    pub sample: Sample,
}

impl TickReport {
    pub fn value_mm(&self) -> f64 {
        self.sample.logged_value()
    }
}

/// Run state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Running => write!(f, "running"),
        }
    }
}

/// Counters since the controller was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub ticks: u64,
    pub sensor_faults: u64,
    pub storage_errors: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    ticks: AtomicU64,
    sensor_faults: AtomicU64,
    storage_errors: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ControllerStats {
        ControllerStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            sensor_faults: self.sensor_faults.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub state: RunState,
    pub cage_id: String,
    pub offset_mm: f64,
    pub calibrated_at: NaiveDateTime,
    pub stats: ControllerStats,
    pub last_value_mm: Option<f64>,
    pub current_partition: Option<String>,
    pub sensor: String,
}

/// Static parameters of a controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub cage_id: String,
    pub log_directory: PathBuf,
    pub poll_interval: Duration,
    pub storage_failure_policy: StorageFailurePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cage_id: "cage-1".to_string(),
            log_directory: PathBuf::from(partition::DEFAULT_DIRECTORY),
            poll_interval: sampling::POLL_INTERVAL,
            storage_failure_policy: StorageFailurePolicy::default(),
        }
    }
}

impl From<&DaemonSettings> for ControllerConfig {
    fn from(settings: &DaemonSettings) -> Self {
        Self {
            cage_id: settings.cage_id.clone(),
            log_directory: settings.log_directory.clone(),
            poll_interval: settings.poll_interval(),
            storage_failure_policy: settings.storage_failure_policy,
        }
    }
}

/// Proof that [`SensorController::begin`] claimed the loop
#[derive(Debug)]
#[must_use = "a claimed run does nothing until passed to SensorController::run"]
pub struct RunToken {
    generation: u64,
}

#[derive(Debug, Clone)]
struct LastTick {
    value_mm: f64,
    partition: String,
}

/// One cage's sampling loop
pub struct SensorController {
    cage_id: String,
    sensor: Mutex<Box<dyn RangeSensor>>,
    calibration: RwLock<CalibrationState>,
    calibration_store: Option<CalibrationStore>,
    rotator: LogFileRotator,
    sink: Arc<dyn ReadingSink>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    policy: StorageFailurePolicy,
    running: AtomicBool,
    generation: AtomicU64,
    stop_notify: Notify,
    counters: StatCounters,
    last: Mutex<Option<LastTick>>,
}

impl SensorController {
    pub fn new(config: ControllerConfig, sensor: Box<dyn RangeSensor>, sink: Arc<dyn ReadingSink>) -> Self {
        Self::with_clock(config, sensor, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ControllerConfig,
        sensor: Box<dyn RangeSensor>,
        sink: Arc<dyn ReadingSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let calibration = CalibrationState::new(clock.now());
        Self {
            cage_id: config.cage_id,
            sensor: Mutex::new(sensor),
            calibration: RwLock::new(calibration),
            calibration_store: None,
            rotator: LogFileRotator::new(config.log_directory),
            sink,
            clock,
            poll_interval: config.poll_interval,
            policy: config.storage_failure_policy,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stop_notify: Notify::new(),
            counters: StatCounters::default(),
            last: Mutex::new(None),
        }
    }

    /// Persist calibrations to `store`, restoring a previously saved offset.
    /// An unreadable record is logged and ignored.
    pub fn with_calibration_store(mut self, store: CalibrationStore) -> Self {
        match store.load() {
            Ok(Some(record)) => {
                if record.cage_id != self.cage_id {
                    warn!(
                        "Calibration record belongs to cage '{}', not '{}' - ignoring",
                        record.cage_id, self.cage_id
                    );
                } else {
                    *self.calibration.get_mut() = CalibrationState::from(&record);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load calibration from {:?}: {}", store.path(), e),
        }
        self.calibration_store = Some(store);
        self
    }

    pub fn cage_id(&self) -> &str {
        &self.cage_id
    }

    pub fn rotator(&self) -> &LogFileRotator {
        &self.rotator
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn offset_mm(&self) -> f64 {
        self.calibration.read().offset_mm()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Enter `Running` and sample until [`stop_sensor`](Self::stop_sensor).
    ///
    /// Fails with [`FoodlogError::AlreadyRunning`] if a loop is active.
    pub async fn start_sensor(&self) -> Result<()> {
        let token = self.begin()?;
        self.run(token).await;
        Ok(())
    }

    /// Claim the loop without running it, so a caller can reject a double
    /// start synchronously and then spawn [`run`](Self::run).
    pub fn begin(&self) -> Result<RunToken> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FoodlogError::AlreadyRunning);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(cage = %self.cage_id, generation, "Sensor loop starting");
        Ok(RunToken { generation })
    }

    /// Request the loop to stop. Returns `false` if it was not running.
    ///
    /// A tick already in flight completes; no later tick writes anything.
    pub fn stop_sensor(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!(cage = %self.cage_id, "Sensor loop stop requested");
            self.stop_notify.notify_waiters();
        }
        was_running
    }

    fn is_current(&self, token: &RunToken) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == token.generation
    }

    /// Sampling loop for a claimed run
    pub async fn run(&self, token: RunToken) {
        let mut consecutive_faults: u64 = 0;
        let mut consecutive_storage_errors: u64 = 0;

        loop {
            let stopped = self.stop_notify.notified();
            tokio::pin!(stopped);

            if !self.is_current(&token) {
                break;
            }

            match self.tick(self.clock.now()) {
                Ok(report) => {
                    if consecutive_storage_errors > 0 {
                        info!("Partition writes recovered after {} errors", consecutive_storage_errors);
                        consecutive_storage_errors = 0;
                    }
                    match &report.sample {
                        Sample::Faulted(fault) => {
                            consecutive_faults += 1;
                            if consecutive_faults == 1 || consecutive_faults % sampling::ERROR_LOG_EVERY == 0 {
                                warn!(
                                    "Sensor read failed (count: {}): {} - logged {}",
                                    consecutive_faults,
                                    fault,
                                    sampling::SENTINEL_MM
                                );
                            }
                        }
                        Sample::Measured(_) => {
                            if consecutive_faults > 0 {
                                debug!("Sensor recovered after {} faults", consecutive_faults);
                                consecutive_faults = 0;
                            }
                        }
                    }
                }
                Err(e) => {
                    consecutive_storage_errors += 1;
                    if consecutive_storage_errors == 1
                        || consecutive_storage_errors % sampling::ERROR_LOG_EVERY == 0
                    {
                        error!("Tick dropped (count: {}): {}", consecutive_storage_errors, e);
                    }
                }
            }

            if !self.is_current(&token) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = &mut stopped => {
                    debug!("Sensor loop woken by stop request");
                }
            }
        }

        info!(cage = %self.cage_id, generation = token.generation, "Sensor loop stopped");
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// One loop iteration at wall-clock time `now`
    pub fn tick(&self, now: NaiveDateTime) -> Result<TickReport> {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let partition = self.rotator.current_partition(now);
        let created_partition = self
            .with_storage_policy(|| self.rotator.ensure_open(&partition))
            .inspect_err(|_| self.record_storage_error())?;

        let sample = self.sample();
        if sample.is_fault() {
            self.counters.sensor_faults.fetch_add(1, Ordering::Relaxed);
        }
        let value = sample.logged_value();

        let timestamp = LogFileRotator::format_timestamp(now);
        self.with_storage_policy(|| self.rotator.append(&partition, &timestamp, value))
            .inspect_err(|_| self.record_storage_error())?;

        self.sink.report_reading(&timestamp, value, sampling::READING_LABEL);
        debug!("Range: {}mm", value);

        *self.last.lock() = Some(LastTick {
            value_mm: value,
            partition: partition.file_name(),
        });

        Ok(TickReport {
            partition,
            created_partition,
            timestamp,
            sample,
        })
    }

    fn sample(&self) -> Sample {
        let raw = self.sensor.lock().read();
        match raw {
            Ok(raw) => Sample::Measured(self.calibration.read().apply(raw)),
            Err(fault) => Sample::Faulted(fault),
        }
    }

    fn record_storage_error(&self) {
        self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn with_storage_policy<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        match op() {
            Err(e) if e.is_storage() && self.policy == StorageFailurePolicy::RetryOnce => {
                warn!("Storage fault, retrying once: {}", e);
                op()
            }
            other => other,
        }
    }

    // ------------------------------------------------------------------------
    // Calibration
    // ------------------------------------------------------------------------

    /// Calibrate against a ground-truth distance. Returns the new offset.
    ///
    /// A running loop picks the offset up on its next tick. A failed read
    /// keeps the previous offset.
    pub fn calibrate(&self, known_distance_mm: f64) -> Result<f64> {
        let mut sensor = self.sensor.lock();
        let mut calibration = self.calibration.write();
        let offset = calibration.calibrate(&mut **sensor, known_distance_mm, self.clock.now())?;
        let record = calibration.to_record(&self.cage_id);
        drop(calibration);
        drop(sensor);

        if let Some(store) = &self.calibration_store {
            if let Err(e) = store.save(&record) {
                warn!("Failed to persist calibration to {:?}: {}", store.path(), e);
            }
        }
        Ok(offset)
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> ControllerStats {
        self.counters.snapshot()
    }

    pub fn status(&self) -> ControllerStatus {
        let calibration = *self.calibration.read();
        let last = self.last.lock().clone();
        ControllerStatus {
            state: if self.is_running() { RunState::Running } else { RunState::Stopped },
            cage_id: self.cage_id.clone(),
            offset_mm: calibration.offset_mm(),
            calibrated_at: calibration.initialized_at(),
            stats: self.stats(),
            last_value_mm: last.as_ref().map(|l| l.value_mm),
            current_partition: last.map(|l| l.partition),
            sensor: self.sensor.lock().describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sensor::MockRangeSensor;
    use crate::sink::NullSink;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn controller(dir: &TempDir, sensor: MockRangeSensor) -> SensorController {
        let config = ControllerConfig {
            log_directory: dir.path().join("Food_sensor_values"),
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        SensorController::with_clock(
            config,
            Box::new(sensor),
            Arc::new(NullSink),
            Arc::new(ManualClock::new(at(13, 0, 0))),
        )
    }

    #[test]
    fn test_fault_logs_sentinel() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = MockRangeSensor::new();
        sensor.expect_read().times(1).returning(|| Err(SensorFault::Bus("nack".into())));
        let ctrl = controller(&tmp, sensor);

        let report = ctrl.tick(at(13, 0, 0)).unwrap();
        assert_eq!(report.sample, Sample::Faulted(SensorFault::Bus("nack".into())));
        assert_eq!(report.value_mm(), 0.0);
        assert!(report.created_partition);

        let content = fs::read_to_string(report.partition.path()).unwrap();
        assert_eq!(content, "Timestamp,Distance (mm)\r\n2024-01-01 13:00:00,0\r\n");
        assert_eq!(ctrl.stats().sensor_faults, 1);
    }

    #[test]
    fn test_calibrate_then_read_gives_known_distance() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = MockRangeSensor::new();
        sensor.expect_read().times(2).returning(|| Ok(187.0));
        let ctrl = controller(&tmp, sensor);

        assert_eq!(ctrl.calibrate(150.0).unwrap(), -37.0);
        let report = ctrl.tick(at(13, 0, 1)).unwrap();
        assert_eq!(report.sample, Sample::Measured(150.0));
    }

    #[test]
    fn test_failed_calibration_keeps_offset() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = MockRangeSensor::new();
        let mut seq = mockall::Sequence::new();
        sensor.expect_read().times(1).in_sequence(&mut seq).returning(|| Ok(100.0));
        sensor
            .expect_read()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(SensorFault::Timeout));
        let ctrl = controller(&tmp, sensor);

        assert_eq!(ctrl.calibrate(90.0).unwrap(), -10.0);
        let err = ctrl.calibrate(500.0).unwrap_err();
        assert!(matches!(err, FoodlogError::Calibration(SensorFault::Timeout)));
        assert_eq!(ctrl.offset_mm(), -10.0);
    }

    #[test]
    fn test_storage_fault_fails_tick_only() {
        let tmp = TempDir::new().unwrap();
        // A file where the partition directory should be
        let blocker = tmp.path().join("Food_sensor_values");
        fs::write(&blocker, "").unwrap();

        let mut sensor = MockRangeSensor::new();
        sensor.expect_read().returning(|| Ok(10.0));
        let ctrl = controller(&tmp, sensor);

        let err = ctrl.tick(at(13, 0, 0)).unwrap_err();
        assert!(err.is_storage());
        assert_eq!(ctrl.stats().storage_errors, 1);

        fs::remove_file(&blocker).unwrap();
        assert!(ctrl.tick(at(13, 0, 1)).is_ok());
    }

    fn retrying_controller(dir: &TempDir, sensor: MockRangeSensor) -> SensorController {
        let config = ControllerConfig {
            log_directory: dir.path().join("Food_sensor_values"),
            poll_interval: Duration::from_millis(10),
            storage_failure_policy: StorageFailurePolicy::RetryOnce,
            ..Default::default()
        };
        SensorController::with_clock(
            config,
            Box::new(sensor),
            Arc::new(NullSink),
            Arc::new(ManualClock::new(at(13, 0, 0))),
        )
    }

    fn transient_fault() -> FoodlogError {
        FoodlogError::storage("/data/Food_20240101_13.csv", std::io::Error::other("disk busy"))
    }

    #[test]
    fn test_retry_once_recovers_from_transient_storage_fault() {
        let tmp = TempDir::new().unwrap();
        let ctrl = retrying_controller(&tmp, MockRangeSensor::new());

        let mut attempts = 0;
        let result = ctrl.with_storage_policy(|| {
            attempts += 1;
            if attempts == 1 {
                Err(transient_fault())
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_retry_once_gives_up_after_second_failure() {
        let tmp = TempDir::new().unwrap();
        let ctrl = retrying_controller(&tmp, MockRangeSensor::new());

        let mut attempts = 0;
        let result: Result<()> = ctrl.with_storage_policy(|| {
            attempts += 1;
            Err(transient_fault())
        });
        assert!(result.unwrap_err().is_storage());
        assert_eq!(attempts, 2);

        // Only storage faults are retried
        attempts = 0;
        let result: Result<()> = ctrl.with_storage_policy(|| {
            attempts += 1;
            Err(FoodlogError::AlreadyRunning)
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_skip_tick_does_not_retry() {
        let tmp = TempDir::new().unwrap();
        let ctrl = controller(&tmp, MockRangeSensor::new());

        let mut attempts = 0;
        let result: Result<()> = ctrl.with_storage_policy(|| {
            attempts += 1;
            Err(transient_fault())
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_retry_once_persistent_fault_counts_one_error_per_tick() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("Food_sensor_values");
        fs::write(&blocker, "").unwrap();

        let mut sensor = MockRangeSensor::new();
        sensor.expect_read().returning(|| Ok(10.0));
        let ctrl = retrying_controller(&tmp, sensor);

        assert!(ctrl.tick(at(13, 0, 0)).unwrap_err().is_storage());
        assert_eq!(ctrl.stats().storage_errors, 1);
        assert!(ctrl.tick(at(13, 0, 1)).unwrap_err().is_storage());
        assert_eq!(ctrl.stats().storage_errors, 2);

        fs::remove_file(&blocker).unwrap();
        let report = ctrl.tick(at(13, 0, 2)).unwrap();
        assert!(report.created_partition);
        let content = fs::read_to_string(report.partition.path()).unwrap();
        assert_eq!(content, "Timestamp,Distance (mm)\r\n2024-01-01 13:00:02,10\r\n");
    }

    #[test]
    fn test_recent_entry_matches_logged_row() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = MockRangeSensor::new();
        sensor.expect_read().returning(|| Ok(33.0));

        // The controller clock has already moved on when the sink runs
        let clock = Arc::new(ManualClock::new(at(14, 0, 0)));
        let buffer = Arc::new(Mutex::new(crate::recent::RecentReadings::new(10)));
        let sink = crate::sink::RecentSink::new(buffer.clone(), clock.clone());
        let config = ControllerConfig {
            log_directory: tmp.path().join("Food_sensor_values"),
            ..Default::default()
        };
        let ctrl = SensorController::with_clock(config, Box::new(sensor), Arc::new(sink), clock);

        let report = ctrl.tick(at(13, 59, 59)).unwrap();
        let entry = buffer.lock().latest().cloned().unwrap();
        assert_eq!(entry.timestamp, report.timestamp);
        assert_eq!(entry.timestamp, "2024-01-01 13:59:59");
        assert_eq!(entry.value, 33.0);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let tmp = TempDir::new().unwrap();
        let ctrl = controller(&tmp, MockRangeSensor::new());

        let _token = ctrl.begin().unwrap();
        assert!(matches!(ctrl.start_sensor().await, Err(FoodlogError::AlreadyRunning)));
        assert!(ctrl.stop_sensor());
        assert!(!ctrl.stop_sensor());
    }

    #[tokio::test]
    async fn test_stale_run_exits_after_restart() {
        let tmp = TempDir::new().unwrap();
        let ctrl = controller(&tmp, MockRangeSensor::new());

        let stale = ctrl.begin().unwrap();
        ctrl.stop_sensor();
        let _fresh = ctrl.begin().unwrap();

        // Returns immediately without ticking; the mock has no read expectation
        ctrl.run(stale).await;
        assert!(ctrl.is_running());
        assert_eq!(ctrl.stats().ticks, 0);
    }

    #[test]
    fn test_status_reflects_last_tick() {
        let tmp = TempDir::new().unwrap();
        let mut sensor = MockRangeSensor::new();
        sensor.expect_read().returning(|| Ok(25.0));
        sensor.expect_describe().returning(|| "mock".to_string());
        let ctrl = controller(&tmp, sensor);

        ctrl.tick(at(13, 30, 0)).unwrap();
        let status = ctrl.status();
        assert_eq!(status.state, RunState::Stopped);
        assert_eq!(status.last_value_mm, Some(25.0));
        assert_eq!(status.current_partition.as_deref(), Some("Food_20240101_13.csv"));
        assert_eq!(status.stats.ticks, 1);
        assert_eq!(status.sensor, "mock");
    }
}
