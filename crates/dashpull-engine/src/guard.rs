//! Single in-flight run enforcement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag held for the duration of a run.
///
/// Manual and scheduled triggers go through the same guard. A trigger that
/// finds it taken is turned away, never queued.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if a run is already in flight.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: Arc::clone(&self.running),
            })
    }

    /// Returns true while a permit is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the guard on drop.
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
