//! Engine error taxonomy.

use thiserror::Error;

/// Errors raised by the extraction engine.
///
/// `Auth`, `Precondition` and `Config` are fatal to a run. `Fetch` and
/// `Persist` are isolated to the report they belong to.
#[derive(Debug, Error)]
pub enum EngineError {
    /// CSRF fetch or login failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An operation was called out of order.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// A report request failed at the transport or HTTP level.
    #[error("fetch failed for report '{report}': {reason}")]
    Fetch { report: String, reason: String },

    /// A report could not be written to disk.
    #[error("could not save report '{report}': {reason}")]
    Persist { report: String, reason: String },

    /// A required configuration value is missing or unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// The report definitions store could not be read.
    #[error("report store error: {0}")]
    Store(String),

    /// HTTP client error outside of a report request.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Build a fetch error for `report` from any displayable cause.
    pub fn fetch(report: &str, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            report: report.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a persist error for `report` from any displayable cause.
    pub fn persist(report: &str, reason: impl std::fmt::Display) -> Self {
        Self::Persist {
            report: report.to_string(),
            reason: reason.to_string(),
        }
    }
}
