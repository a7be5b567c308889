//! Wall-clock source
//!
//! Partition selection and row timestamps use local wall-clock time. The
//! controller takes the clock as a trait object so hour boundaries can be
//! exercised without waiting for them.

use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    /// Current local wall-clock time
    fn now(&self) -> NaiveDateTime;
}

/// The system's local time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Manually driven clock; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(13, 59, 59).unwrap();
        let clock = ManualClock::new(start);
        let other = clock.clone();

        clock.advance(Duration::seconds(1));
        assert_eq!(other.now().format("%H:%M:%S").to_string(), "14:00:00");
    }
}
