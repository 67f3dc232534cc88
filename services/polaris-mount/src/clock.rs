//! Time source collaborator
//!
//! The session never reads the wall clock directly: freshness arithmetic
//! uses monotonic instants and the coordinate transform takes an opaque
//! julian date. Both come through this trait so tests can pin time.

use std::time::Instant;

/// Days between the unix epoch and the julian epoch
const UNIX_EPOCH_JULIAN_DATE: f64 = 2_440_587.5;

/// Time source for freshness checks and coordinate conversion
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Monotonic timestamp for cache age arithmetic
    fn now(&self) -> Instant;

    /// Current julian date for the coordinate transform
    fn julian_date(&self) -> f64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn julian_date(&self) -> f64 {
        let now = chrono::Utc::now();
        let seconds = now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0;
        UNIX_EPOCH_JULIAN_DATE + seconds / 86_400.0
    }
}
