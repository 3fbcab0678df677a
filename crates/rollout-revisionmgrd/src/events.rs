//! Operator-visible events.

use parking_lot::Mutex;
use tracing::{info, warn};

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Sink for events about the controller's progress.
pub trait EventRecorder: Send + Sync {
    /// Records an event.
    fn record(&self, event_type: EventType, reason: &str, message: String);

    /// Records a normal event.
    fn event(&self, reason: &str, message: String) {
        self.record(EventType::Normal, reason, message);
    }

    /// Records a warning event.
    fn warning(&self, reason: &str, message: String) {
        self.record(EventType::Warning, reason, message);
    }
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event_type: EventType, reason: &str, message: String) {
        match event_type {
            EventType::Normal => info!(event = reason, "{}", message),
            EventType::Warning => warn!(event = reason, "{}", message),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons of every event recorded so far, in order.
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventRecorder for InMemoryRecorder {
    fn record(&self, event_type: EventType, reason: &str, message: String) {
        self.events.lock().push(RecordedEvent {
            event_type,
            reason: reason.to_string(),
            message,
        });
    }
}
