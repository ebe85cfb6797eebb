//! Interval scheduler.
//!
//! [`ScheduleMachine`] holds the Idle/Waiting/Running state machine and the
//! jitter and busy-window decisions; it never touches a timer. [`Scheduler`]
//! drives it from a single tokio task that owns the timer, the command
//! channel and the in-flight run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use dashpull_core::{
    BusyWindow, EngineEvent, JitterPolicy, LogLevel, ScheduleState, SchedulerPhase,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigSource;
use crate::engine::{ExtractionJob, TriggerOutcome};
use crate::sink::EventSink;

/// What to do when the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// Start a run now.
    Run,
    /// Busy window active; re-armed for `until`.
    Deferred {
        until: DateTime<Local>,
        remaining_secs: u64,
    },
    /// Not waiting, nothing to do.
    Ignored,
}

/// The next interval chosen after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rescheduled {
    pub at: DateTime<Local>,
    pub base_minutes: u32,
    pub jitter_minutes: u32,
}

/// How auto mode was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enabled {
    /// First run armed after the start jitter.
    Armed { jitter_minutes: u32 },
    /// A run started before the last disable is still going; the next
    /// interval is chosen when it completes.
    AfterRun,
}

/// Pure scheduler state machine.
///
/// `in_flight` outlives `Running`: a run that was started keeps it set until
/// [`ScheduleMachine::complete`], even if auto mode is disabled meanwhile, so
/// re-enabling never arms a second run next to it.
#[derive(Debug, Clone)]
pub struct ScheduleMachine {
    phase: SchedulerPhase,
    next_run_at: Option<DateTime<Local>>,
    in_flight: bool,
    policy: JitterPolicy,
}

impl ScheduleMachine {
    pub fn new(policy: JitterPolicy) -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            next_run_at: None,
            in_flight: false,
            policy,
        }
    }

    /// Returns true between a `Run` decision and its `complete`.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn next_run_at(&self) -> Option<DateTime<Local>> {
        self.next_run_at
    }

    pub fn state(&self) -> ScheduleState {
        ScheduleState {
            mode: self.phase.mode(),
            phase: self.phase,
            next_run_at: self.next_run_at,
        }
    }

    /// Enter auto mode from `Idle`. Returns `None` if already active.
    pub fn enable<R: Rng>(&mut self, now: DateTime<Local>, rng: &mut R) -> Option<Enabled> {
        if self.phase != SchedulerPhase::Idle {
            return None;
        }
        if self.in_flight {
            self.phase = SchedulerPhase::Running;
            self.next_run_at = None;
            return Some(Enabled::AfterRun);
        }
        let jitter_minutes = self.policy.start_minutes(rng);
        self.next_run_at = Some(now + minutes(jitter_minutes));
        self.phase = SchedulerPhase::Waiting;
        Some(Enabled::Armed { jitter_minutes })
    }

    /// Timer fired. The busy window is evaluated against `now`.
    pub fn fire(&mut self, now: DateTime<Local>, window: BusyWindow) -> FireDecision {
        if self.phase != SchedulerPhase::Waiting {
            return FireDecision::Ignored;
        }
        if let Some(remaining_secs) = window.remaining_secs(&now) {
            let until = now + TimeDelta::seconds(remaining_secs as i64);
            self.next_run_at = Some(until);
            return FireDecision::Deferred {
                until,
                remaining_secs,
            };
        }
        self.phase = SchedulerPhase::Running;
        self.next_run_at = None;
        self.in_flight = true;
        FireDecision::Run
    }

    /// A scheduled run finished. Re-arms for `base + jitter` minutes unless
    /// auto mode was disabled meanwhile.
    pub fn complete<R: Rng>(
        &mut self,
        now: DateTime<Local>,
        base_minutes: u32,
        rng: &mut R,
    ) -> Option<Rescheduled> {
        self.in_flight = false;
        if self.phase != SchedulerPhase::Running {
            return None;
        }
        let jitter_minutes = self.policy.cycle_minutes(rng);
        let at = now + minutes(base_minutes + jitter_minutes);
        self.next_run_at = Some(at);
        self.phase = SchedulerPhase::Waiting;
        Some(Rescheduled {
            at,
            base_minutes,
            jitter_minutes,
        })
    }

    /// Leave auto mode. Returns false if already idle.
    pub fn disable(&mut self) -> bool {
        let was_active = self.phase != SchedulerPhase::Idle;
        self.phase = SchedulerPhase::Idle;
        self.next_run_at = None;
        was_active
    }
}

fn minutes(n: u32) -> TimeDelta {
    TimeDelta::minutes(i64::from(n))
}

#[derive(Debug)]
enum Command {
    Enable,
    Disable,
    Shutdown,
}

/// Timer-driven trigger for an [`ExtractionJob`].
pub struct Scheduler {
    job: Arc<dyn ExtractionJob>,
    config: Arc<dyn ConfigSource>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    policy: JitterPolicy,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(
        job: Arc<dyn ExtractionJob>,
        config: Arc<dyn ConfigSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            job,
            config,
            sink,
            clock: Arc::new(SystemClock),
            policy: JitterPolicy::default(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_policy(mut self, policy: JitterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start the driver task in `Idle`.
    pub fn spawn(self) -> SchedulerHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ScheduleState::default());
        let task = tokio::spawn(self.drive(rx, state_tx));
        SchedulerHandle {
            commands,
            state,
            task,
        }
    }

    async fn drive(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ScheduleState>,
    ) {
        let mut machine = ScheduleMachine::new(self.policy.clone());
        let mut running: Option<JoinHandle<TriggerOutcome>> = None;

        loop {
            let delay = match machine.phase() {
                SchedulerPhase::Waiting => machine.next_run_at().map(|at| self.delay_until(at)),
                _ => None,
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enable) => self.on_enable(&mut machine),
                    Some(Command::Disable) => {
                        if machine.disable() {
                            info!("Auto interval stopped");
                            self.notice(LogLevel::Info, "Auto interval stopped.".to_string());
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        machine.disable();
                        state_tx.send_replace(machine.state());
                        if let Some(handle) = running.take() {
                            debug!("Waiting for in-flight run before shutdown");
                            handle.await.ok();
                        }
                        break;
                    }
                },
                _ = sleep_for(delay) => {
                    let window = self.config.load().busy_window();
                    let decision = machine.fire(self.clock.now(), window);
                    self.after_fire(decision, &mut running);
                },
                joined = wait_run(&mut running), if running.is_some() => {
                    running = None;
                    self.on_run_finished(&mut machine, joined);
                },
            }

            state_tx.send_replace(machine.state());
        }
    }

    fn on_enable(&mut self, machine: &mut ScheduleMachine) {
        let base = self.config.load().interval.interval_minutes;
        match machine.enable(self.clock.now(), &mut self.rng) {
            Some(Enabled::Armed { jitter_minutes }) => {
                info!(jitter_minutes, base_minutes = base, "Auto interval enabled");
                self.notice(
                    LogLevel::Info,
                    format!(
                        "Auto interval enabled (base {base} min). First extraction in ~{jitter_minutes} min."
                    ),
                );
            }
            Some(Enabled::AfterRun) => {
                info!(base_minutes = base, "Auto interval enabled, waiting for the current run");
                self.notice(
                    LogLevel::Info,
                    format!(
                        "Auto interval enabled (base {base} min). Next extraction is scheduled once the current one finishes."
                    ),
                );
            }
            None => {
                self.notice(LogLevel::Warn, "Auto interval already active.".to_string());
            }
        }
    }

    fn after_fire(&self, decision: FireDecision, running: &mut Option<JoinHandle<TriggerOutcome>>) {
        match decision {
            FireDecision::Run => {
                info!("Starting scheduled extraction");
                self.notice(
                    LogLevel::Info,
                    format!(
                        "[auto] Scheduled extraction at {}",
                        self.clock.now().format("%d/%m/%Y %H:%M:%S")
                    ),
                );
                let job = Arc::clone(&self.job);
                *running = Some(tokio::spawn(async move { job.run_scheduled().await }));
            }
            FireDecision::Deferred {
                until,
                remaining_secs,
            } => {
                info!(until = %until, remaining_secs, "Busy window active, extraction deferred");
                self.notice(
                    LogLevel::Info,
                    format!(
                        "Server busy window active, extraction deferred by {}s until {}.",
                        remaining_secs,
                        until.format("%H:%M:%S")
                    ),
                );
            }
            FireDecision::Ignored => {}
        }
    }

    fn on_run_finished(
        &mut self,
        machine: &mut ScheduleMachine,
        joined: Result<TriggerOutcome, JoinError>,
    ) {
        match joined {
            Ok(TriggerOutcome::Completed(summary)) => {
                debug!(run_id = %summary.run_id, "Scheduled run finished");
            }
            Ok(TriggerOutcome::AlreadyRunning) => {
                info!("Scheduled run skipped, another run was in flight");
            }
            Err(e) => warn!(error = %e, "Scheduled run task failed"),
        }

        let base = self.config.load().interval.interval_minutes;
        if let Some(next) = machine.complete(self.clock.now(), base, &mut self.rng) {
            info!(
                base_minutes = next.base_minutes,
                jitter_minutes = next.jitter_minutes,
                next_run_at = %next.at,
                "Next extraction scheduled"
            );
            self.notice(
                LogLevel::Info,
                format!(
                    "Next jitter {} min, next extraction in ~{} min at {}.",
                    next.jitter_minutes,
                    next.base_minutes + next.jitter_minutes,
                    next.at.format("%d/%m/%Y %H:%M:%S")
                ),
            );
        }
    }

    fn delay_until(&self, at: DateTime<Local>) -> Duration {
        (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
    }

    fn notice(&self, level: LogLevel, message: String) {
        self.sink.emit(EngineEvent::notice(level, message));
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

async fn wait_run(
    running: &mut Option<JoinHandle<TriggerOutcome>>,
) -> Result<TriggerOutcome, JoinError> {
    match running {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Control surface of a spawned [`Scheduler`].
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ScheduleState>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Switch to auto mode. No-op if already active.
    pub fn enable(&self) {
        self.commands.send(Command::Enable).ok();
    }

    /// Back to manual mode. Does not interrupt a run in progress.
    pub fn disable(&self) {
        self.commands.send(Command::Disable).ok();
    }

    /// Latest published state.
    pub fn state(&self) -> ScheduleState {
        self.state.borrow().clone()
    }

    /// Watch state changes, e.g. for a countdown display.
    pub fn subscribe(&self) -> watch::Receiver<ScheduleState> {
        self.state.clone()
    }

    /// Stop scheduling, wait for an in-flight run, and end the driver task.
    pub async fn shutdown(self) {
        self.commands.send(Command::Shutdown).ok();
        self.task.await.ok();
    }
}
