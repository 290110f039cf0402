use chrono::{DateTime, Duration, Utc};
use handoff_types::truncate_to_millis;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time for lifecycle decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time at millisecond resolution
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_to_millis(Utc::now())
    }
}

/// Manually driven clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct SimulatedClock {
    base: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl SimulatedClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Move the clock forward (or backward for a negative duration)
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        self.offset_ms
            .store((to - self.base).num_milliseconds(), Ordering::SeqCst);
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}
