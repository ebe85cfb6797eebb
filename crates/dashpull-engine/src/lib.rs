//! dashpull extraction engine.
//!
//! Logs into the dashboard, downloads every configured report with bounded
//! concurrency and writes each one to disk as CSV (or JSON when the payload
//! cannot be tabulated). Runs are started manually through [`Engine::trigger`]
//! or periodically by a [`Scheduler`].
//!
//! Nothing here renders anything: progress and log lines are emitted as
//! [`dashpull_core::EngineEvent`]s to an [`EventSink`] chosen by the shell.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod guard;
pub mod persister;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use config::{
    ConfigSource, Credentials, EngineConfig, IniConfigSource, IntervalSettings, StaticConfig,
};
pub use coordinator::{Coordinator, RunRequest};
pub use engine::{Engine, ExtractionJob, Trigger, TriggerOutcome};
pub use error::EngineError;
pub use guard::{RunGuard, RunPermit};
pub use persister::{persist, Degradation, PersistFormat, PersistedReport};
pub use scheduler::{Enabled, FireDecision, ScheduleMachine, Scheduler, SchedulerHandle};
pub use session::{AuthSession, HttpSessionFactory, ReportSession, SessionFactory};
pub use sink::{EventSink, MemorySink, TracingSink};
pub use store::{JsonReportStore, ReportStore};
