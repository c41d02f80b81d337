//! Event sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Level};

/// A structured event emitted by the pipeline or its resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event name such as `retry.scheduled`.
    pub kind: String,
    /// Event payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Emission time.
    pub at: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            at: Utc::now(),
        }
    }

    /// Returns true for events that report a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        [".failed", ".exhausted", ".opened", ".rejected"]
            .iter()
            .any(|suffix| self.kind.ends_with(suffix))
    }
}

/// Receives events from the orchestrator, the retry handler and the
/// circuit breakers.
///
/// Components take the sink as a constructor argument; nothing in the
/// crate writes to a process-global logger directly.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without awaiting. Must never panic or fail.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Forwards events to `tracing`.
///
/// Failure events are always logged at WARN; everything else uses the
/// configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &Event) {
        let data = event.data.as_ref().map(ToString::to_string).unwrap_or_default();
        if event.is_failure() {
            warn!(event_type = %event.kind, event_data = %data, "{}", event.kind);
        } else if self.level == Level::DEBUG {
            debug!(event_type = %event.kind, event_data = %data, "{}", event.kind);
        } else {
            info!(event_type = %event.kind, event_data = %data, "{}", event.kind);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(&Event::new(event_type, data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(&Event::new(event_type, data));
    }
}

/// Keeps every event in memory. Used by tests to assert on emissions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<Event>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events whose kind starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of events whose kind is exactly `kind`.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.events.read().iter().filter(|e| e.kind == kind).count()
    }

    fn push(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push(Event::new(event_type, data));
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.push(event_type, data);
    }
}
