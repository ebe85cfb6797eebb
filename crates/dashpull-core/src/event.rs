//! Events published by the engine to its shell.

use serde::{Deserialize, Serialize};

use crate::ids::RunId;
use crate::outcome::RunSummary;

/// Severity of a human-readable log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Observational event stream. The shell never feeds anything back into a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Run-level progress, monotonically non-decreasing within a run.
    Progress {
        run_id: RunId,
        percent: u8,
        completed: usize,
        total: usize,
    },
    /// Human-readable status line.
    Log {
        run_id: Option<RunId>,
        level: LogLevel,
        message: String,
    },
    /// One report finished, successfully or not.
    ReportOutcome {
        run_id: RunId,
        report_name: String,
        success: bool,
    },
    /// Fired exactly once per run, whatever the outcome mix.
    RunFinished { summary: RunSummary },
}

impl EngineEvent {
    /// Info line scoped to a run.
    pub fn info(run_id: &RunId, message: impl Into<String>) -> Self {
        Self::Log {
            run_id: Some(run_id.clone()),
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    /// Warning line scoped to a run.
    pub fn warn(run_id: &RunId, message: impl Into<String>) -> Self {
        Self::Log {
            run_id: Some(run_id.clone()),
            level: LogLevel::Warn,
            message: message.into(),
        }
    }

    /// Error line scoped to a run.
    pub fn error(run_id: &RunId, message: impl Into<String>) -> Self {
        Self::Log {
            run_id: Some(run_id.clone()),
            level: LogLevel::Error,
            message: message.into(),
        }
    }

    /// Line not tied to a run (scheduler decisions).
    pub fn notice(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            run_id: None,
            level,
            message: message.into(),
        }
    }

    /// Returns true for the terminal event of a run.
    pub fn is_run_finished(&self) -> bool {
        matches!(self, Self::RunFinished { .. })
    }
}
