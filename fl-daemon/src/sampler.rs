//! Sampler wiring
//!
//! Builds the sensor, sinks and controller from the settings file and owns
//! the background task running the sampling loop.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fl_core::constants::paths;
use fl_core::{
    CalibrationStore, ConsoleSink, ControllerConfig, DaemonSettings, Fanout, IioRangeSensor,
    RangeSensor, RecentReadings, RecentSink, SensorController, SensorSettings,
    SimulatedRangeSensor, SystemClock, TelemetryLog,
};
use fl_error::Result;

/// Open the configured sensor.
///
/// A missing IIO device falls back to the simulated sensor only when
/// `simulate_fallback` is set.
pub fn build_sensor(settings: &SensorSettings, simulate_fallback: bool) -> Result<Box<dyn RangeSensor>> {
    match settings {
        SensorSettings::Simulated { min_mm, max_mm, fault_rate } => {
            info!("Using simulated sensor ({}..{} mm, fault rate {})", min_mm, max_mm, fault_rate);
            Ok(Box::new(SimulatedRangeSensor::new(*min_mm, *max_mm, *fault_rate)))
        }
        SensorSettings::Iio { device_name, device_path } => {
            let opened = match device_path {
                Some(dir) => IioRangeSensor::open(dir),
                None => IioRangeSensor::discover(Path::new(paths::IIO_DEVICES), device_name),
            };
            match opened {
                Ok(sensor) => {
                    info!("Using IIO sensor at {:?}", sensor.device_dir());
                    Ok(Box::new(sensor))
                }
                Err(e) if simulate_fallback => {
                    warn!("IIO sensor unavailable ({}) - falling back to simulated readings", e);
                    Ok(Box::new(SimulatedRangeSensor::new(
                        fl_core::constants::simulated::MIN_MM,
                        fl_core::constants::simulated::MAX_MM,
                        0.0,
                    )))
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Controller plus the pieces the server needs next to it
pub struct Sampler {
    controller: Arc<SensorController>,
    recent: Arc<Mutex<RecentReadings>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sampler {
    pub fn from_settings(settings: &DaemonSettings, sensor: Box<dyn RangeSensor>) -> Self {
        let clock = Arc::new(SystemClock);
        let recent = Arc::new(Mutex::new(RecentReadings::new(settings.recent_capacity)));

        let mut sink = Fanout::new()
            .with(Arc::new(ConsoleSink))
            .with(Arc::new(RecentSink::new(recent.clone(), clock.clone())));
        if let Some(path) = &settings.telemetry_path {
            info!("Telemetry log: {:?}", path);
            sink = sink.with(Arc::new(TelemetryLog::open(path)));
        }

        let controller = SensorController::with_clock(
            ControllerConfig::from(settings),
            sensor,
            Arc::new(sink),
            clock,
        )
        .with_calibration_store(CalibrationStore::new(settings.calibration_path()));

        Self::new(Arc::new(controller), recent)
    }

    pub fn new(controller: Arc<SensorController>, recent: Arc<Mutex<RecentReadings>>) -> Self {
        Self {
            controller,
            recent,
            task: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &Arc<SensorController> {
        &self.controller
    }

    pub fn recent(&self) -> &Arc<Mutex<RecentReadings>> {
        &self.recent
    }

    /// Claim the loop and run it on a background task
    pub fn start(&self) -> Result<()> {
        let token = self.controller.begin()?;
        let controller = self.controller.clone();
        let handle = tokio::spawn(async move {
            controller.run(token).await;
        });
        // A previous task has already been told to stop; it exits on its own
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Request the loop to stop. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        self.controller.stop_sensor()
    }

    /// Stop the loop and wait for the in-flight tick to finish
    pub async fn shutdown(&self) {
        self.controller.stop_sensor();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Sampling task ended abnormally: {}", e);
            }
        }
    }
}
