//! Wall-clock abstraction.

use chrono::{DateTime, Local};

/// Source of the current local time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
