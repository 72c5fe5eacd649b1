//! Per-run counters.

use serde::{Deserialize, Serialize};

/// Aggregated statistics for one workflow run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Events taken off the queue and routed.
    pub events_dispatched: usize,
    /// Dispatched events that matched no handler.
    pub unrouted_events: usize,
    /// Handler invocations started.
    pub handlers_started: usize,
    /// Handler invocations that finished without error.
    pub handlers_completed: usize,
    /// Failure messages, one per failed invocation.
    pub failures: Vec<String>,
}

impl RunMetrics {
    /// Record one dispatched event routed to `handlers` registrations.
    pub fn record_dispatch(&mut self, handlers: usize) {
        self.events_dispatched += 1;
        if handlers == 0 {
            self.unrouted_events += 1;
        }
        self.handlers_started += handlers;
    }

    /// Record a successful handler invocation.
    pub fn record_completion(&mut self) {
        self.handlers_completed += 1;
    }

    /// Record a failure message.
    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }

    /// Check if there were any failures.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Handler invocations neither completed nor failed yet (or aborted).
    pub fn handlers_outstanding(&self) -> usize {
        self.handlers_started
            .saturating_sub(self.handlers_completed + self.failures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrouted_events_counted() {
        let mut metrics = RunMetrics::default();
        metrics.record_dispatch(2);
        metrics.record_dispatch(0);

        assert_eq!(metrics.events_dispatched, 2);
        assert_eq!(metrics.unrouted_events, 1);
        assert_eq!(metrics.handlers_started, 2);
        assert_eq!(metrics.handlers_outstanding(), 2);

        metrics.record_completion();
        metrics.record_failure("boom".to_string());
        assert_eq!(metrics.handlers_outstanding(), 0);
        assert!(metrics.has_failures());
    }
}
