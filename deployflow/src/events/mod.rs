//! Event sinks used for observability.
//!
//! Every component that reports progress takes an `Arc<dyn EventSink>`.
//! The default is [`NoOpEventSink`]; binaries usually install a
//! [`LoggingEventSink`] after calling
//! [`init_tracing`](crate::observability::init_tracing).

mod sink;

pub use sink::{CollectingEventSink, Event, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Shared handle to a sink.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Returns a sink that discards everything.
#[must_use]
pub fn noop_sink() -> SharedEventSink {
    Arc::new(NoOpEventSink)
}
