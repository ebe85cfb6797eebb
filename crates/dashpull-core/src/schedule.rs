//! Schedule state, the busy-window predicate and the jitter policy.

use std::ops::RangeInclusive;

use chrono::{DateTime, Local, Timelike};
use rand::Rng;
use serde::Serialize;

/// Whether extraction is only manual or also timer-driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleMode {
    #[default]
    Manual,
    Auto,
}

/// Scheduler state machine phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerPhase {
    /// Manual mode, no timer armed.
    #[default]
    Idle,
    /// Timer armed for `next_run_at`.
    Waiting,
    /// A scheduled run is in progress.
    Running,
}

impl SchedulerPhase {
    /// Auto mode covers every phase except `Idle`.
    pub fn mode(&self) -> ScheduleMode {
        match self {
            Self::Idle => ScheduleMode::Manual,
            Self::Waiting | Self::Running => ScheduleMode::Auto,
        }
    }
}

/// Snapshot of the scheduler published for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleState {
    pub mode: ScheduleMode,
    pub phase: SchedulerPhase,
    pub next_run_at: Option<DateTime<Local>>,
}

impl ScheduleState {
    /// Seconds until the next run, if one is armed.
    pub fn seconds_until_next(&self, now: DateTime<Local>) -> Option<i64> {
        self.next_run_at
            .map(|at| (at - now).num_seconds().max(0))
    }
}

/// Recurring upstream maintenance window: the first `minutes` minutes of
/// every even hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyWindow {
    minutes: u32,
}

impl BusyWindow {
    /// Create a window, clamping the width to [0, 59] minutes.
    pub fn new(minutes: u32) -> Self {
        Self {
            minutes: minutes.min(59),
        }
    }

    /// Width of the window in minutes.
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// Returns true if `at` falls inside the window.
    pub fn is_busy<T: Timelike>(&self, at: &T) -> bool {
        at.hour() % 2 == 0 && at.minute() < self.minutes
    }

    /// Seconds until the window closes, or `None` when not busy.
    pub fn remaining_secs<T: Timelike>(&self, at: &T) -> Option<u64> {
        if !self.is_busy(at) {
            return None;
        }
        let elapsed = at.minute() * 60 + at.second();
        let remaining = (self.minutes * 60).saturating_sub(elapsed);
        Some(u64::from(remaining.max(1)))
    }
}

/// Randomised offsets applied to the schedule.
///
/// The first run waits `start` minutes after auto mode is enabled; every
/// later interval is the configured base plus `cycle` minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterPolicy {
    pub start: RangeInclusive<u32>,
    pub cycle: RangeInclusive<u32>,
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self {
            start: 1..=10,
            cycle: 1..=20,
        }
    }
}

impl JitterPolicy {
    /// Delay before the first run, in minutes.
    pub fn start_minutes<R: Rng>(&self, rng: &mut R) -> u32 {
        rng.gen_range(self.start.clone())
    }

    /// Extra minutes added on top of the base interval for one cycle.
    pub fn cycle_minutes<R: Rng>(&self, rng: &mut R) -> u32 {
        rng.gen_range(self.cycle.clone())
    }
}
