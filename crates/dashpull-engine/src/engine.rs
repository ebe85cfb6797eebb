//! Engine facade: ties configuration, the report store, sessions and the
//! coordinator together behind the single-run guard.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashpull_core::{EngineEvent, LogLevel, RunId, RunSummary};
use tracing::{info, warn};

use crate::config::ConfigSource;
use crate::coordinator::{Coordinator, RunRequest};
use crate::guard::RunGuard;
use crate::session::{HttpSessionFactory, SessionFactory};
use crate::sink::EventSink;
use crate::store::ReportStore;

/// What asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Scheduled,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduled => write!(f, "auto"),
        }
    }
}

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The run executed; its summary.
    Completed(RunSummary),
    /// Another run was in flight, nothing was started.
    AlreadyRunning,
}

/// Something the scheduler can start.
#[async_trait]
pub trait ExtractionJob: Send + Sync + 'static {
    async fn run_scheduled(&self) -> TriggerOutcome;
}

/// The extraction engine.
pub struct Engine<F: SessionFactory = HttpSessionFactory> {
    config: Arc<dyn ConfigSource>,
    store: Arc<dyn ReportStore>,
    sink: Arc<dyn EventSink>,
    sessions: F,
    guard: RunGuard,
}

impl Engine<HttpSessionFactory> {
    /// Engine talking to the real dashboard.
    pub fn new(
        config: Arc<dyn ConfigSource>,
        store: Arc<dyn ReportStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_sessions(config, store, sink, HttpSessionFactory)
    }
}

impl<F: SessionFactory> Engine<F> {
    /// Engine with a custom session source.
    pub fn with_sessions(
        config: Arc<dyn ConfigSource>,
        store: Arc<dyn ReportStore>,
        sink: Arc<dyn EventSink>,
        sessions: F,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            sessions,
            guard: RunGuard::new(),
        }
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Start a run unless one is already in flight.
    pub async fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            warn!(%trigger, "Extraction already running, trigger ignored");
            self.sink.emit(EngineEvent::notice(
                LogLevel::Warn,
                format!("Extraction already running, {trigger} trigger ignored."),
            ));
            return TriggerOutcome::AlreadyRunning;
        };
        TriggerOutcome::Completed(self.run_exclusive(trigger).await)
    }

    async fn run_exclusive(&self, trigger: Trigger) -> RunSummary {
        let run_id = RunId::generate();
        let coordinator = Coordinator::new(Arc::clone(&self.sink));
        let config = self.config.load();

        info!(run_id = %run_id, %trigger, "Starting extraction");
        self.sink.emit(EngineEvent::info(
            &run_id,
            format!("[{trigger}] Starting extraction {}", run_id.short()),
        ));

        if let Err(e) = config.validate_for_extraction() {
            return coordinator.abort(run_id, &e);
        }

        let reports = self.store.snapshot();
        let session = match self.sessions.create(&config) {
            Ok(session) => session,
            Err(e) => return coordinator.abort(run_id, &e),
        };

        let request = RunRequest {
            run_id,
            reports,
            output_dir: config.output_dir.clone(),
            concurrency: config.max_workers,
            credentials: config.credentials.clone(),
        };
        coordinator.run(session, request).await
    }
}

#[async_trait]
impl<F: SessionFactory> ExtractionJob for Engine<F> {
    async fn run_scheduled(&self) -> TriggerOutcome {
        self.trigger(Trigger::Scheduled).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use dashpull_core::{FetchResult, ReportDefinition, ReportSet};
    use serde_json::json;

    use super::*;
    use crate::config::{Credentials, EngineConfig, StaticConfig};
    use crate::error::EngineError;
    use crate::session::ReportSession;
    use crate::sink::MemorySink;

    struct SlowSession {
        delay: Duration,
        logins: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ReportSession for SlowSession {
        async fn fetch_csrf_token(&mut self) -> Result<String, EngineError> {
            Ok("tok".into())
        }

        async fn login(&mut self, _credentials: &Credentials) -> Result<bool, EngineError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn fetch(&self, _report: &ReportDefinition) -> Result<FetchResult, EngineError> {
            tokio::time::sleep(self.delay).await;
            Ok(FetchResult::RawCsv {
                content: "x\n".into(),
            })
        }
    }

    struct SlowFactory {
        delay: Duration,
        logins: Arc<AtomicUsize>,
    }

    impl SessionFactory for SlowFactory {
        type Session = SlowSession;

        fn create(&self, _config: &EngineConfig) -> Result<SlowSession, EngineError> {
            Ok(SlowSession {
                delay: self.delay,
                logins: Arc::clone(&self.logins),
            })
        }
    }

    fn engine(
        dir: &std::path::Path,
        credentials: Credentials,
        sink: MemorySink,
    ) -> (Engine<SlowFactory>, Arc<AtomicUsize>) {
        let config = EngineConfig {
            output_dir: dir.to_path_buf(),
            credentials,
            ..EngineConfig::default()
        };
        let reports: ReportSet = [ReportDefinition::new("a", "/a.csv", Some(json!({})))]
            .into_iter()
            .collect();
        let logins = Arc::new(AtomicUsize::new(0));
        let engine = Engine::with_sessions(
            Arc::new(StaticConfig(config)),
            Arc::new(reports),
            Arc::new(sink),
            SlowFactory {
                delay: Duration::from_millis(100),
                logins: Arc::clone(&logins),
            },
        );
        (engine, logins)
    }

    #[tokio::test]
    async fn test_overlapping_triggers_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, logins) = engine(dir.path(), Credentials::new("a", "b"), MemorySink::new());

        let (manual, scheduled) = tokio::join!(engine.trigger(Trigger::Manual), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.run_scheduled().await
        });

        assert!(matches!(manual, TriggerOutcome::Completed(_)));
        assert_eq!(scheduled, TriggerOutcome::AlreadyRunning);
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert!(!engine.is_running());

        // The guard is free again once the run is over.
        assert!(matches!(
            engine.trigger(Trigger::Manual).await,
            TriggerOutcome::Completed(_)
        ));
        assert_eq!(logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_credentials_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let (engine, logins) = engine(dir.path(), Credentials::default(), sink.clone());

        let outcome = engine.trigger(Trigger::Manual).await;

        match outcome {
            TriggerOutcome::Completed(summary) => {
                assert!(summary.is_fatal());
                assert!(summary.outcomes.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(logins.load(Ordering::SeqCst), 0);
        assert_eq!(sink.events().iter().filter(|e| e.is_run_finished()).count(), 1);
    }
}
