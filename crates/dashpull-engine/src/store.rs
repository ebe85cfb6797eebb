//! Read side of the report definitions store.

use std::path::{Path, PathBuf};

use dashpull_core::ReportSet;
use tracing::warn;

use crate::error::EngineError;

/// Provides the snapshot of report definitions a run works from.
pub trait ReportStore: Send + Sync {
    fn snapshot(&self) -> ReportSet;
}

/// A fixed set, for embedding and tests.
impl ReportStore for ReportSet {
    fn snapshot(&self) -> ReportSet {
        self.clone()
    }
}

/// `request.json` on disk, re-read for every snapshot.
#[derive(Debug, Clone)]
pub struct JsonReportStore {
    path: PathBuf,
}

impl JsonReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the store, surfacing errors.
    pub fn load(&self) -> Result<ReportSet, EngineError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| EngineError::Store(format!("{}: {e}", self.path.display())))?;
        ReportSet::from_store_json(&raw)
            .map_err(|e| EngineError::Store(format!("{}: {e}", self.path.display())))
    }
}

impl ReportStore for JsonReportStore {
    /// Unreadable or malformed stores yield an empty set.
    fn snapshot(&self) -> ReportSet {
        self.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load report definitions");
            ReportSet::new()
        })
    }
}
