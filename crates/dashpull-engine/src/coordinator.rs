//! Extraction coordinator: authenticate, fan out, aggregate.

use std::path::PathBuf;
use std::sync::Arc;

use dashpull_core::{
    progress_percent, EngineEvent, ExtractionOutcome, ReportDefinition, ReportSet, RunId,
    RunSummary,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{Credentials, MAX_WORKERS_RANGE};
use crate::error::EngineError;
use crate::persister;
use crate::session::ReportSession;
use crate::sink::EventSink;

/// Inputs for one run, taken as a snapshot at trigger time.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub reports: ReportSet,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub credentials: Credentials,
}

/// Runs one extraction over a fresh session.
pub struct Coordinator {
    sink: Arc<dyn EventSink>,
}

impl Coordinator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Execute a run to completion. Emits `RunFinished` exactly once.
    pub async fn run<S: ReportSession>(&self, session: S, request: RunRequest) -> RunSummary {
        let summary = self.execute(session, request).await;
        self.sink.emit(EngineEvent::RunFinished {
            summary: summary.clone(),
        });
        summary
    }

    /// Finish a run that could not start, with a single error event.
    pub fn abort(&self, run_id: RunId, error: &EngineError) -> RunSummary {
        error!(run_id = %run_id, error = %error, "Run aborted");
        self.sink.emit(EngineEvent::error(&run_id, error.to_string()));
        let summary = RunSummary::aborted(run_id, error.to_string());
        self.sink.emit(EngineEvent::RunFinished {
            summary: summary.clone(),
        });
        summary
    }

    async fn execute<S: ReportSession>(&self, mut session: S, request: RunRequest) -> RunSummary {
        let RunRequest {
            run_id,
            reports,
            output_dir,
            concurrency,
            credentials,
        } = request;
        let total = reports.len();

        if total == 0 {
            warn!(run_id = %run_id, "No reports to extract");
            self.sink.emit(EngineEvent::warn(&run_id, "No reports to extract."));
            self.sink.emit(EngineEvent::Progress {
                run_id: run_id.clone(),
                percent: progress_percent(0, 0),
                completed: 0,
                total: 0,
            });
            return RunSummary {
                run_id,
                outcomes: Vec::new(),
                completed: 0,
                total: 0,
                fatal: None,
            };
        }

        if let Err(e) = self.authenticate(&run_id, &mut session, &credentials).await {
            error!(run_id = %run_id, error = %e, "Authentication failed");
            self.sink.emit(EngineEvent::error(&run_id, e.to_string()));
            return RunSummary::aborted(run_id, e.to_string());
        }

        for names in persister::stem_collisions(reports.iter().map(|r| r.name.as_str())) {
            let names = names.join("', '");
            warn!(run_id = %run_id, reports = %names, "Reports share an output file name");
            self.sink.emit(EngineEvent::warn(
                &run_id,
                format!("Reports '{names}' map to the same file name; only one will be kept."),
            ));
        }

        let workers = concurrency
            .clamp(MAX_WORKERS_RANGE.0, MAX_WORKERS_RANGE.1)
            .min(total);
        info!(run_id = %run_id, total, workers, "Dispatching reports");
        self.sink.emit(EngineEvent::info(
            &run_id,
            format!("Extracting {total} reports with {workers} parallel workers..."),
        ));
        self.sink.emit(EngineEvent::Progress {
            run_id: run_id.clone(),
            percent: 0,
            completed: 0,
            total,
        });

        let session = Arc::new(session);
        let permits = Arc::new(Semaphore::new(workers));
        let output_dir = Arc::new(output_dir);
        let mut tasks = JoinSet::new();

        for report in reports {
            let session = Arc::clone(&session);
            let permits = Arc::clone(&permits);
            let output_dir = Arc::clone(&output_dir);
            let sink = Arc::clone(&self.sink);
            let run_id = run_id.clone();

            tasks.spawn(async move {
                let name = report.name.clone();
                let Ok(_permit) = permits.acquire_owned().await else {
                    return ExtractionOutcome::failed(name, "worker pool closed");
                };
                // Inner task so a panic still maps to this report's outcome.
                let job = tokio::spawn(extract_one(session, report, output_dir, sink, run_id));
                match job.await {
                    Ok(outcome) => outcome,
                    Err(e) => ExtractionOutcome::failed(name, format!("report task aborted: {e}")),
                }
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                error!(run_id = %run_id, error = %e, "Report task lost");
                ExtractionOutcome::failed("<unknown>", e.to_string())
            });

            outcomes.push(outcome.clone());
            let completed = outcomes.len();
            self.sink.emit(EngineEvent::ReportOutcome {
                run_id: run_id.clone(),
                report_name: outcome.report_name,
                success: outcome.success,
            });
            self.sink.emit(EngineEvent::Progress {
                run_id: run_id.clone(),
                percent: progress_percent(completed, total),
                completed,
                total,
            });
        }

        let summary = RunSummary {
            run_id,
            completed: outcomes.len(),
            total,
            outcomes,
            fatal: None,
        };
        info!(
            run_id = %summary.run_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "All reports finished"
        );
        self.sink.emit(EngineEvent::info(
            &summary.run_id,
            format!(
                "All {} reports finished: {} succeeded, {} failed.",
                total,
                summary.succeeded(),
                summary.failed()
            ),
        ));
        summary
    }

    async fn authenticate<S: ReportSession>(
        &self,
        run_id: &RunId,
        session: &mut S,
        credentials: &Credentials,
    ) -> Result<(), EngineError> {
        self.sink.emit(EngineEvent::info(run_id, "Fetching CSRF token..."));
        session.fetch_csrf_token().await?;
        self.sink.emit(EngineEvent::info(run_id, "CSRF token acquired."));

        self.sink.emit(EngineEvent::info(run_id, "Logging in..."));
        if !session.login(credentials).await? {
            return Err(EngineError::Auth(
                "login rejected, check username/password".to_string(),
            ));
        }
        info!(run_id = %run_id, "Login succeeded");
        self.sink.emit(EngineEvent::info(run_id, "Login succeeded."));
        Ok(())
    }
}

async fn extract_one<S: ReportSession>(
    session: Arc<S>,
    report: ReportDefinition,
    output_dir: Arc<PathBuf>,
    sink: Arc<dyn EventSink>,
    run_id: RunId,
) -> ExtractionOutcome {
    let name = report.name.clone();
    sink.emit(EngineEvent::info(&run_id, format!("Fetching report '{name}'...")));

    let fetched = match session.fetch(&report).await {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(run_id = %run_id, report = %name, error = %e, "Report fetch failed");
            sink.emit(EngineEvent::error(&run_id, format!("Error extracting '{name}': {e}")));
            return ExtractionOutcome::failed(name, e.to_string());
        }
    };
    sink.emit(EngineEvent::info(
        &run_id,
        format!("Report '{name}' fetched ({}), saving...", fetched.kind()),
    ));

    match persister::persist(&output_dir, &name, fetched).await {
        Ok(persisted) => {
            let message = persisted.message();
            let line = format!("Report '{name}' {message}");
            if persisted.degraded.is_some() {
                sink.emit(EngineEvent::warn(&run_id, line));
            } else {
                sink.emit(EngineEvent::info(&run_id, line));
            }
            ExtractionOutcome::succeeded(name, message)
        }
        Err(e) => {
            warn!(run_id = %run_id, report = %name, error = %e, "Report save failed");
            sink.emit(EngineEvent::error(&run_id, format!("Error saving '{name}': {e}")));
            ExtractionOutcome::failed(name, e.to_string())
        }
    }
}
