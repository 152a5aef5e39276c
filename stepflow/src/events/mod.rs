//! Structured event emission for pipeline runs.
//!
//! Sinks are injected per invocation through
//! [`ExecutionOptions::with_event_sink`](crate::pipeline::ExecutionOptions::with_event_sink);
//! there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
