//! Structured run trace for observability.
//!
//! The dispatcher records a [`RunEvent`] for every dispatched event and every
//! handler invocation, so a run can be inspected after the fact without
//! scraping log lines.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Things that happen inside a run, recorded in its trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RunEvent {
    /// An event left the queue and was routed.
    EventDispatched {
        /// Kind name of the dispatched event.
        kind: String,
        /// Creation-order tag of the event.
        sequence: u64,
        /// Number of handlers the event was routed to.
        handlers: usize,
    },
    /// A handler invocation started.
    HandlerStart {
        /// Name of the handler.
        handler: String,
        /// Kind name of the triggering event.
        kind: String,
    },
    /// A handler invocation finished successfully.
    HandlerEnd {
        /// Name of the handler.
        handler: String,
        /// Duration of the invocation in milliseconds.
        duration_ms: u128,
        /// Kind name of the returned event, if any.
        emitted: Option<String>,
    },
    /// A handler invocation failed.
    HandlerError {
        /// Name of the handler.
        handler: String,
        /// Error message.
        message: String,
    },
    /// The run stopped dispatching.
    Stopped {
        /// Why the run stopped.
        reason: String,
    },
}

/// A timestamped trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Unix epoch timestamp in milliseconds.
    pub timestamp: u128,
    /// The recorded event.
    #[serde(flatten)]
    pub event: RunEvent,
}

impl TraceEntry {
    /// Create a new trace entry with the current timestamp.
    #[must_use]
    pub fn new(event: RunEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        Self { timestamp, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_entry_serialization() {
        let entry = TraceEntry::new(RunEvent::HandlerStart {
            handler: "on:start".to_string(),
            kind: "start".to_string(),
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"HandlerStart\""));
        assert!(json.contains("\"handler\":\"on:start\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_dispatch_event_round_trip() {
        let event = RunEvent::EventDispatched {
            kind: "work".to_string(),
            sequence: 12,
            handlers: 0,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EventDispatched");
        assert_eq!(json["payload"]["handlers"], 0);
        let back: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
