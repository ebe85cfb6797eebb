//! dashpull CLI - run dashboard report extractions once or on an interval.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dashpull_core::{EngineEvent, LogLevel, RunSummary};
use dashpull_engine::{
    ConfigSource, Engine, EventSink, IniConfigSource, JsonReportStore, Scheduler, TracingSink,
    Trigger, TriggerOutcome,
};

/// dashpull - dashboard report extractor
#[derive(Parser)]
#[command(name = "dashpull")]
#[command(about = "Download dashboard reports as CSV", long_about = None)]
struct Cli {
    /// INI configuration file
    #[arg(short, long, default_value = "config.ini", global = true)]
    config: PathBuf,

    /// Report definitions (JSON)
    #[arg(short, long, default_value = "request.json", global = true)]
    reports: PathBuf,

    /// Print engine events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Send engine events to the log only (for running headless)
    #[arg(short, long, global = true, conflicts_with = "json")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one extraction now
    Run,

    /// Stay running; extract on the configured interval
    Watch {
        /// Enable auto mode even if INTERVAL.enabled is off
        #[arg(long)]
        force_auto: bool,
    },

    /// List configured reports
    Reports,

    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dashpull_engine=info,dashpull=info,warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Arc::new(IniConfigSource::new(cli.config.clone()));
    let store = Arc::new(JsonReportStore::new(cli.reports.clone()));

    let output = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Run => run_once(config, store, output).await?,
        Commands::Watch { force_auto } => watch(config, store, output, force_auto).await?,
        Commands::Reports => list_reports(&store)?,
        Commands::Config => show_config(&config),
    }

    Ok(())
}

/// How engine events reach the user.
#[derive(Clone, Copy)]
struct Output {
    json: bool,
    quiet: bool,
}

impl Output {
    /// The sink to hand the engine, plus the printer task draining it, if any.
    fn sink(self) -> (Arc<dyn EventSink>, Option<JoinHandle<()>>) {
        if self.quiet {
            return (Arc::new(TracingSink), None);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(tx), Some(tokio::spawn(print_events(rx, self.json))))
    }
}

async fn run_once(
    config: Arc<IniConfigSource>,
    store: Arc<JsonReportStore>,
    output: Output,
) -> Result<(), Box<dyn std::error::Error>> {
    let (sink, printer) = output.sink();

    let engine = Engine::new(config, store, sink);
    let outcome = engine.trigger(Trigger::Manual).await;
    drop(engine);
    if let Some(printer) = printer {
        printer.await?;
    }

    match outcome {
        TriggerOutcome::Completed(summary) => match summary.fatal {
            Some(reason) => Err(format!("extraction aborted: {reason}").into()),
            None if summary.failed() > 0 => {
                Err(format!("{} of {} reports failed", summary.failed(), summary.total).into())
            }
            None => Ok(()),
        },
        TriggerOutcome::AlreadyRunning => Err("an extraction is already running".into()),
    }
}

async fn watch(
    config: Arc<IniConfigSource>,
    store: Arc<JsonReportStore>,
    output: Output,
    force_auto: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (sink, printer) = output.sink();

    let engine = Arc::new(Engine::new(config.clone(), store, sink.clone()));
    let scheduler = Scheduler::new(engine.clone(), config.clone(), sink.clone()).spawn();

    if force_auto || config.load().interval.enabled {
        scheduler.enable();
    }

    println!("Commands: now | start | stop | status | quit");
    let (command_tx, mut commands) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = forward_commands(BufReader::new(tokio::io::stdin()), command_tx).await {
            warn!(error = %e, "Failed to read stdin");
        }
    });
    let mut stdin_open = true;

    loop {
        tokio::select! {
            command = commands.recv(), if stdin_open => match command {
                Some(WatchCommand::Now) => {
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.trigger(Trigger::Manual).await });
                }
                Some(WatchCommand::Start) => scheduler.enable(),
                Some(WatchCommand::Stop) => scheduler.disable(),
                Some(WatchCommand::Status) => {
                    let state = scheduler.state();
                    let countdown = state
                        .seconds_until_next(Local::now())
                        .map(countdown)
                        .unwrap_or_else(|| "--:--:--".to_string());
                    println!(
                        "mode={:?} phase={:?} next={} running={}",
                        state.mode,
                        state.phase,
                        countdown,
                        engine.is_running()
                    );
                }
                Some(WatchCommand::Quit) => break,
                None => {
                    info!("stdin closed, press Ctrl-C to stop");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    drop(engine);
    drop(sink);
    // Manual runs spawned above keep a sender alive until they finish.
    if let Some(printer) = printer {
        printer.await?;
    }
    Ok(())
}

/// A line typed at the `watch` prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchCommand {
    Now,
    Start,
    Stop,
    Status,
    Quit,
}

impl WatchCommand {
    /// Blank lines are `Ok(None)`; unknown words come back as `Err`.
    fn parse(line: &str) -> Result<Option<Self>, &str> {
        match line.trim() {
            "" => Ok(None),
            "now" => Ok(Some(Self::Now)),
            "start" => Ok(Some(Self::Start)),
            "stop" => Ok(Some(Self::Stop)),
            "status" => Ok(Some(Self::Status)),
            "quit" | "exit" => Ok(Some(Self::Quit)),
            other => Err(other),
        }
    }
}

/// Forward commands read from `input` until `quit` or end of input.
///
/// End of input only closes the channel; it is not a quit.
async fn forward_commands<R>(
    input: R,
    commands: mpsc::UnboundedSender<WatchCommand>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match WatchCommand::parse(&line) {
            Ok(Some(command)) => {
                if commands.send(command).is_err() || command == WatchCommand::Quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(other) => println!("Unknown command: {other}"),
        }
    }
    Ok(())
}

fn list_reports(store: &JsonReportStore) -> Result<(), Box<dyn std::error::Error>> {
    let reports = store.load()?;

    println!("Reports ({}) in {}:", reports.len(), store.path().display());
    println!("{:<32}  {:<8}  {}", "NAME", "KIND", "SOURCE");
    println!("{}", "-".repeat(80));
    for report in reports.iter() {
        let kind = if report.is_raw_csv() { "csv" } else { "json" };
        println!("{:<32}  {:<8}  {}", report.name, kind, report.source);
    }

    Ok(())
}

fn show_config(source: &IniConfigSource) {
    let config = source.load();
    println!("file:            {}", source.path().display());
    println!("base_url:        {}", config.base_url);
    println!("output_dir:      {}", config.output_dir.display());
    println!("max_workers:     {}", config.max_workers);
    println!("request_timeout: {}s", config.request_timeout_secs);
    println!("username:        {}", config.credentials.username);
    println!(
        "password:        {}",
        if config.credentials.password.is_empty() { "(unset)" } else { "********" }
    );
    println!("interval:        {} min", config.interval.interval_minutes);
    println!("auto at start:   {}", config.interval.enabled);
    println!("busy window:     {} min per even hour", config.busy_minutes);
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<EngineEvent>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("failed to encode event: {e}"),
            }
            continue;
        }
        match event {
            EngineEvent::Progress {
                percent,
                completed,
                total,
                ..
            } => println!("[{percent:>3}%] {completed}/{total}"),
            EngineEvent::Log { level, message, .. } => {
                let tag = match level {
                    LogLevel::Info => "INFO ",
                    LogLevel::Warn => "WARN ",
                    LogLevel::Error => "ERROR",
                };
                println!("{} {tag} {message}", Local::now().format("%H:%M:%S"));
            }
            EngineEvent::ReportOutcome {
                report_name,
                success,
                ..
            } => println!("  {} {report_name}", if success { "ok  " } else { "FAIL" }),
            EngineEvent::RunFinished { summary } => print_summary(&summary),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Run {} finished:", summary.run_id.short());
    if let Some(reason) = &summary.fatal {
        println!("  aborted: {reason}");
        return;
    }
    println!(
        "  {} succeeded, {} failed, {}/{} done",
        summary.succeeded(),
        summary.failed(),
        summary.completed,
        summary.total
    );
    for outcome in summary.outcomes.iter().filter(|o| !o.success) {
        println!("  - {}: {}", outcome.report_name, outcome.message);
    }
}

fn countdown(secs: i64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
