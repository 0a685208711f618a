use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::TriageResult;

/// Capacity of the per-run broadcast channel. Generous relative to the five-step
/// pipeline so a slow subscriber never forces the orchestrator to block.
const CHANNEL_CAPACITY: usize = 64;

/// How long a completed run's terminal event stays available to late joiners.
pub const LATE_JOIN_WINDOW: Duration = Duration::from_secs(300);

/// A single tagged event emitted onto a run's event bus. One closed enum instead
/// of opaque records, so subscribers pattern-match rather than string-sniff a `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriageEvent {
    Connected {
        run_id: Uuid,
    },
    Start {
        run_id: Uuid,
        alert_id: Uuid,
    },
    Step {
        name: String,
        ok: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Retry {
        step: String,
        attempt: u32,
    },
    Fallback {
        step: String,
        last_error: String,
    },
    Complete {
        result: Box<TriageResult>,
    },
    Error {
        message: String,
    },
}

impl TriageEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TriageEvent::Complete { .. } | TriageEvent::Error { .. })
    }
}

/// Wire envelope the SSE transport frames as `data: <json>\n\n`.
#[derive(Debug, Clone, Serialize)]
pub struct TriageEventFrame {
    #[serde(flatten)]
    pub event: TriageEvent,
    pub timestamp: DateTime<Utc>,
}

impl TriageEventFrame {
    pub fn new(event: TriageEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Write-only handle the orchestrator uses to publish onto a run's bus. Transport
/// code never gets one of these — it only ever receives an `EventStream`, which
/// keeps the cycle the orchestrator/transport relationship could otherwise form
/// impossible by construction.
#[derive(Clone)]
pub struct EventSink {
    sender: broadcast::Sender<TriageEventFrame>,
}

impl EventSink {
    pub fn publish(&self, event: TriageEvent) {
        let _ = self.sender.send(TriageEventFrame::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriageEventFrame> {
        self.sender.subscribe()
    }
}

/// Record kept in the process-local run registry for one in-flight or recently
/// completed triage run.
pub struct RunHandle {
    pub run_id: Uuid,
    pub alert_id: Uuid,
    pub sink: EventSink,
    pub started_at: DateTime<Utc>,
    pub terminal: std::sync::RwLock<Option<TriageEventFrame>>,
}

impl RunHandle {
    fn new(run_id: Uuid, alert_id: Uuid) -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            run_id,
            alert_id,
            sink: EventSink { sender },
            started_at: Utc::now(),
            terminal: std::sync::RwLock::new(None),
        }
    }

    pub fn record_terminal(&self, frame: TriageEventFrame) {
        if let Ok(mut slot) = self.terminal.write() {
            *slot = Some(frame);
        }
    }

    pub fn terminal_frame(&self) -> Option<TriageEventFrame> {
        self.terminal.read().ok().and_then(|slot| slot.clone())
    }
}

/// Process-local registry mapping `run_id -> RunHandle`. Entries are inserted on
/// `start` and swept out roughly `LATE_JOIN_WINDOW` after their terminal event, so
/// a late-joining subscriber still sees the cached terminal frame for a while.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<Uuid, Arc<RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, alert_id: Uuid) -> Arc<RunHandle> {
        let run_id = Uuid::new_v4();
        let handle = Arc::new(RunHandle::new(run_id, alert_id));
        self.runs.insert(run_id, handle.clone());
        handle
    }

    pub fn get(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.get(&run_id).map(|entry| entry.value().clone())
    }

    /// Remove runs whose terminal event is older than `LATE_JOIN_WINDOW`. Intended
    /// to be driven by a periodic background task.
    pub fn sweep(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(LATE_JOIN_WINDOW).unwrap();
        self.runs.retain(|_, handle| {
            handle
                .terminal_frame()
                .map(|frame| frame.timestamp > cutoff)
                .unwrap_or(true)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_creates_unique_handles() {
        let registry = RunRegistry::new();
        let a = registry.register(Uuid::new_v4());
        let b = registry.register(Uuid::new_v4());
        assert_ne!(a.run_id, b.run_id);
        assert!(registry.get(a.run_id).is_some());
    }

    #[test]
    fn terminal_event_is_cached_on_handle() {
        let registry = RunRegistry::new();
        let handle = registry.register(Uuid::new_v4());
        assert!(handle.terminal_frame().is_none());

        handle.record_terminal(TriageEventFrame::new(TriageEvent::Error {
            message: "boom".to_string(),
        }));
        assert!(handle.terminal_frame().is_some());
    }

    #[tokio::test]
    async fn subscribers_receive_published_events_in_order() {
        let registry = RunRegistry::new();
        let handle = registry.register(Uuid::new_v4());
        let mut rx = handle.sink.subscribe();

        handle.sink.publish(TriageEvent::Start {
            run_id: handle.run_id,
            alert_id: handle.alert_id,
        });
        handle.sink.publish(TriageEvent::Error {
            message: "done".to_string(),
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.event, TriageEvent::Start { .. }));
        assert!(second.event.is_terminal());
    }
}
