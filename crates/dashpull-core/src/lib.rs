//! Domain types shared by the dashpull engine and its shells.
//!
//! Report definitions, fetch results, run summaries, engine events and the
//! schedule state. No I/O lives here.

pub mod error;
pub mod event;
pub mod ids;
pub mod outcome;
pub mod report;
pub mod schedule;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{EngineEvent, LogLevel};
pub use ids::RunId;
pub use outcome::{progress_percent, ExtractionOutcome, FetchResult, RunSummary};
pub use report::{ReportDefinition, ReportSet};
pub use schedule::{BusyWindow, JitterPolicy, ScheduleMode, ScheduleState, SchedulerPhase};
