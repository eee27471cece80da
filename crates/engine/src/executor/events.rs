use parking_lot::Mutex;
use tracing::{info, warn};

use idle_types::{EngineEvent, EngineEventKind};

/// Receives engine events as an execution progresses.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &EngineEvent) {
        let step = event.step.as_deref().unwrap_or("-");
        match event.kind {
            EngineEventKind::StepFailed | EngineEventKind::SessionDisposalFailed => warn!(
                kind = ?event.kind,
                correlation_id = %event.correlation_id,
                step,
                "{}",
                event.message
            ),
            _ => info!(
                kind = ?event.kind,
                correlation_id = %event.correlation_id,
                step,
                "{}",
                event.message
            ),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EngineEventKind> {
        self.events.lock().iter().map(|event| event.kind).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &EngineEvent) {
        self.events.lock().push(event.clone());
    }
}
