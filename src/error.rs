//! Error types for workflow runs.

use std::sync::Arc;

use thiserror::Error;

/// The main error type for workflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A handler returned an error or panicked, which aborts the whole run.
    #[error("Handler '{handler}' failed: {source}")]
    HandlerFailed {
        /// Name of the handler that failed.
        handler: String,
        /// The error the handler produced.
        #[source]
        source: Arc<Error>,
    },

    /// The run was cancelled and no longer accepts or produces events.
    #[error("Workflow run cancelled")]
    Cancelled,

    /// The opt-in `max_events` cutoff was reached.
    #[error("Event limit of {limit} exceeded")]
    EventLimitExceeded {
        /// The configured maximum number of dispatched events.
        limit: usize,
    },

    /// A [`Cycle`](crate::Cycle) tried to advance past its iteration limit.
    #[error("Cycle limit of {limit} iterations reached")]
    CycleLimit {
        /// The configured iteration limit.
        limit: u32,
    },

    /// A stream ended before the expected number of matching events arrived.
    #[error("Stream ended after {observed} of {expected} expected event(s)")]
    StreamEnded {
        /// How many matching events were awaited.
        expected: usize,
        /// How many actually arrived.
        observed: usize,
    },

    /// The event's kind was defined without a JSON encoder.
    #[error("Event kind '{kind}' has no payload serializer")]
    NotSerializable {
        /// Name of the offending kind.
        kind: String,
    },

    /// An event did not carry the payload type its kind promises.
    #[error("Payload type mismatch for event kind '{kind}'")]
    PayloadMismatch {
        /// Name of the offending kind.
        kind: String,
    },

    /// The completion capability failed.
    #[error("Completion error: {0}")]
    Completion(String),

    /// Invalid workflow configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Rebuilds a run-ending error for one more observer.
    ///
    /// The dispatcher stores the fatal error once; every stream of the run
    /// yields its own copy.
    pub(crate) fn replay(shared: &Arc<Error>) -> Error {
        match shared.as_ref() {
            Error::HandlerFailed { handler, source } => Error::HandlerFailed {
                handler: handler.clone(),
                source: Arc::clone(source),
            },
            Error::EventLimitExceeded { limit } => Error::EventLimitExceeded { limit: *limit },
            Error::Cancelled => Error::Cancelled,
            other => Error::Message(other.to_string()),
        }
    }

    /// Returns the error a failed handler produced, if this is a handler failure.
    pub fn handler_source(&self) -> Option<&Error> {
        match self {
            Error::HandlerFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_keeps_handler_failure_shape() {
        let shared = Arc::new(Error::HandlerFailed {
            handler: "on:start".to_string(),
            source: Arc::new(Error::from("boom")),
        });

        let replayed = Error::replay(&shared);
        assert!(matches!(replayed, Error::HandlerFailed { ref handler, .. } if handler == "on:start"));
        assert_eq!(replayed.handler_source().map(ToString::to_string), Some("boom".to_string()));
        assert_eq!(replayed.to_string(), "Handler 'on:start' failed: boom");
    }

    #[test]
    fn test_replay_event_limit() {
        let shared = Arc::new(Error::EventLimitExceeded { limit: 4 });
        assert!(matches!(Error::replay(&shared), Error::EventLimitExceeded { limit: 4 }));
    }
}
