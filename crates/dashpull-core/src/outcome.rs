//! Fetch results, per-report outcomes and the run summary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RunId;

/// Data retrieved for one report, consumed exactly once by the persister.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// Body of a direct CSV download, kept verbatim.
    RawCsv { content: String },
    /// Parsed JSON response of an API report.
    StructuredJson { body: Value },
}

impl FetchResult {
    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RawCsv { .. } => "raw_csv",
            Self::StructuredJson { .. } => "json",
        }
    }
}

/// Result of extracting one report in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub report_name: String,
    pub success: bool,
    pub message: String,
}

impl ExtractionOutcome {
    /// A report that was fetched and written.
    pub fn succeeded(report_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            success: true,
            message: message.into(),
        }
    }

    /// A report whose fetch or write failed.
    pub fn failed(report_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            success: false,
            message: message.into(),
        }
    }
}

/// Aggregate result of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    /// One entry per dispatched report, in completion order.
    pub outcomes: Vec<ExtractionOutcome>,
    pub completed: usize,
    pub total: usize,
    /// Set when the run aborted before any report was dispatched.
    pub fatal: Option<String>,
}

impl RunSummary {
    /// Summary of a run that never dispatched a report.
    pub fn aborted(run_id: RunId, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            outcomes: Vec::new(),
            completed: 0,
            total: 0,
            fatal: Some(reason.into()),
        }
    }

    /// Number of successful outcomes.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Number of failed outcomes.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Returns true if the run aborted on authentication or configuration.
    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

/// Progress as a whole percentage, 100 once every report is done.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total);
    ((completed * 100) / total) as u8
}
