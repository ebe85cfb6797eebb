//! Consumers of the engine event stream.

use std::sync::{Arc, Mutex};

use dashpull_core::{EngineEvent, LogLevel};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Receives engine events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forward events over a channel; a dropped receiver is ignored.
impl EventSink for mpsc::UnboundedSender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        self.send(event).ok();
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: EngineEvent) {
        (**self).emit(event)
    }
}

/// Renders log events through `tracing`; other events are traced at info.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::Log { level, message, .. } => match level {
                LogLevel::Info => info!("{message}"),
                LogLevel::Warn => warn!("{message}"),
                LogLevel::Error => error!("{message}"),
            },
            EngineEvent::Progress {
                percent,
                completed,
                total,
                ..
            } => info!(percent, completed, total, "Progress"),
            EngineEvent::ReportOutcome {
                report_name,
                success,
                ..
            } => info!(report = %report_name, success, "Report finished"),
            EngineEvent::RunFinished { summary } => info!(
                run_id = %summary.run_id,
                completed = summary.completed,
                total = summary.total,
                "Run finished"
            ),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashpull_core::RunId;

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(EngineEvent::info(&RunId::new("r"), "hello"));
        let event = rx.try_recv().unwrap();
        assert!(matches!(event, EngineEvent::Log { .. }));
    }

    #[test]
    fn test_channel_sink_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<EngineEvent>();
        drop(rx);
        tx.emit(EngineEvent::info(&RunId::new("r"), "nobody listens"));
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        let run_id = RunId::new("r");
        sink.emit(EngineEvent::info(&run_id, "one"));
        sink.emit(EngineEvent::info(&run_id, "two"));

        let messages: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Log { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["one", "two"]);
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
        let run_id = RunId::new("r");
        sink.emit(EngineEvent::warn(&run_id, "slow"));
        sink.emit(EngineEvent::Progress {
            run_id: run_id.clone(),
            percent: 50,
            completed: 1,
            total: 2,
        });
        sink.emit(EngineEvent::ReportOutcome {
            run_id: run_id.clone(),
            report_name: "sales".into(),
            success: true,
        });
        sink.emit(EngineEvent::RunFinished {
            summary: dashpull_core::RunSummary::aborted(run_id, "stopped"),
        });
    }
}
