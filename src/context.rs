//! Per-run contexts.
//!
//! [`WorkflowContext`] is the caller's handle on one run: it seeds events,
//! exposes the run's [`EventStream`] and cancels the run. [`HandlerContext`]
//! is what each handler invocation receives: it sends follow-up events,
//! subscribes to the run's stream for joins, and reaches the run's store and
//! cancellation token.
//!
//! Dropping every `WorkflowContext` clone and every stream obtained from them
//! detaches the caller without cancelling anything: handlers still in flight
//! finish naturally, and the run drains once its queue is empty and no
//! handler is running. Only [`WorkflowContext::cancel`] aborts a run.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::journal::{Journal, RunEnd};
use crate::metrics::RunMetrics;
use crate::store::Store;
use crate::trace::{RunEvent, TraceEntry};
use crate::{Error, Event, EventKind, EventStream, Result};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Created, nothing sent yet.
    Idle,
    /// At least one event was sent and the run has not stopped.
    Running,
    /// Cancelled by the caller.
    Cancelled,
    /// Stopped by a handler failure or the event limit.
    Failed,
    /// Every caller handle was dropped, and the remaining work finished.
    Drained,
}

impl RunPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RunPhase::Idle,
            1 => RunPhase::Running,
            2 => RunPhase::Cancelled,
            3 => RunPhase::Failed,
            _ => RunPhase::Drained,
        }
    }

    /// Whether the run has stopped dispatching.
    pub fn is_stopped(self) -> bool {
        matches!(self, RunPhase::Cancelled | RunPhase::Failed | RunPhase::Drained)
    }
}

/// State shared by the dispatcher and every context of one run.
pub(crate) struct RunShared<S> {
    pub(crate) run_id: u64,
    pub(crate) workflow: Arc<str>,
    pub(crate) journal: Arc<Journal>,
    pub(crate) token: CancellationToken,
    /// Cancelled once the caller dropped every handle on the run.
    pub(crate) detached: CancellationToken,
    pub(crate) store: Store<S>,
    phase: AtomicU8,
    metrics: Mutex<RunMetrics>,
    traces: Mutex<Vec<TraceEntry>>,
    trace_enabled: bool,
}

impl<S> RunShared<S> {
    pub(crate) fn new(
        run_id: u64,
        workflow: Arc<str>,
        store: Store<S>,
        trace_enabled: bool,
    ) -> Self {
        Self {
            run_id,
            workflow,
            journal: Arc::new(Journal::new()),
            token: CancellationToken::new(),
            detached: CancellationToken::new(),
            store,
            phase: AtomicU8::new(RunPhase::Idle as u8),
            metrics: Mutex::new(RunMetrics::default()),
            traces: Mutex::new(Vec::new()),
            trace_enabled,
        }
    }

    pub(crate) fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn mark_running(&self) {
        let _ = self.phase.compare_exchange(
            RunPhase::Idle as u8,
            RunPhase::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stop the run. The first end wins, and the journal records the same end
    /// as the phase.
    pub(crate) fn stop(&self, end: RunEnd) {
        let phase = match end {
            RunEnd::Cancelled => RunPhase::Cancelled,
            RunEnd::Failed(_) => RunPhase::Failed,
            RunEnd::Drained => RunPhase::Drained,
        };
        let won = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!RunPhase::from_u8(current).is_stopped()).then_some(phase as u8)
            })
            .is_ok();
        if won {
            self.journal.finish(end);
        }
        self.token.cancel();
    }

    pub(crate) fn metrics(&self) -> MutexGuard<'_, RunMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if self.trace_enabled {
            let entry = TraceEntry::new(event);
            self.traces
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry);
        }
    }

    fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send(&self, sender: &mpsc::UnboundedSender<Event>, event: Event) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        sender.send(event).map_err(|_| Error::Cancelled)?;
        self.mark_running();
        Ok(())
    }
}

/// The caller's handle on one run.
///
/// Cheap to clone; all clones drive the same run.
pub struct WorkflowContext<S = ()> {
    shared: Arc<RunShared<S>>,
    sender: mpsc::UnboundedSender<Event>,
    guard: Arc<DropGuard>,
}

impl<S> Clone for WorkflowContext<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            sender: self.sender.clone(),
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<S> WorkflowContext<S> {
    pub(crate) fn new(shared: Arc<RunShared<S>>, sender: mpsc::UnboundedSender<Event>) -> Self {
        let guard = Arc::new(shared.detached.clone().drop_guard());
        Self {
            shared,
            sender,
            guard,
        }
    }

    /// Enqueue an event.
    ///
    /// Fails with [`Error::Cancelled`] once the run has stopped.
    pub fn send_event(&self, event: Event) -> Result<()> {
        self.shared.send(&self.sender, event)
    }

    /// Every event of the run, from the very first one, in dispatch order.
    ///
    /// Holding the stream keeps the caller attached to the run.
    pub fn stream(&self) -> EventStream {
        EventStream::from_cursor(self.shared.journal.cursor(0), Some(Arc::clone(&self.guard)))
    }

    /// Wait for the first event of `terminal` and return its payload.
    ///
    /// A handler failure surfaces as `Err`. The run is left running; call
    /// [`cancel`](Self::cancel) to stop it.
    pub async fn run_until<T: Send + Sync + 'static>(
        &self,
        terminal: &EventKind<T>,
    ) -> Result<Arc<T>> {
        let mut payloads = self.stream().barrier(terminal, 1).await?;
        payloads.pop().ok_or(Error::StreamEnded {
            expected: 1,
            observed: 0,
        })
    }

    /// Stop the run: abort in-flight handlers and end every stream.
    ///
    /// This is the only way to abort a run. Dropping every handle instead
    /// lets in-flight handlers finish.
    pub fn cancel(&self) {
        self.shared.stop(RunEnd::Cancelled);
    }

    /// Whether the run has stopped.
    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// The run's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RunPhase {
        self.shared.phase()
    }

    /// The run's store.
    pub fn store(&self) -> &Store<S> {
        &self.shared.store
    }

    /// Process-unique run identifier.
    pub fn run_id(&self) -> u64 {
        self.shared.run_id
    }

    /// Name of the workflow this run belongs to.
    pub fn workflow_name(&self) -> &str {
        &self.shared.workflow
    }

    /// Number of events journaled so far.
    pub fn event_count(&self) -> usize {
        self.shared.journal.len()
    }

    /// Snapshot of the run's counters.
    pub fn metrics(&self) -> RunMetrics {
        self.shared.metrics().clone()
    }

    /// Snapshot of the run's structured trace.
    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.shared.trace_snapshot()
    }
}

/// What a handler invocation receives alongside its event.
pub struct HandlerContext<S = ()> {
    shared: Arc<RunShared<S>>,
    sender: mpsc::UnboundedSender<Event>,
    token: CancellationToken,
    resume_at: usize,
}

impl<S> Clone for HandlerContext<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            sender: self.sender.clone(),
            token: self.token.clone(),
            resume_at: self.resume_at,
        }
    }
}

impl<S> HandlerContext<S> {
    /// Context for an invocation triggered by the event at journal `position`.
    pub(crate) fn new(
        shared: Arc<RunShared<S>>,
        sender: mpsc::UnboundedSender<Event>,
        position: usize,
    ) -> Self {
        let token = shared.token.child_token();
        Self {
            shared,
            sender,
            token,
            resume_at: position + 1,
        }
    }

    /// Enqueue an event. Events sent by one invocation keep their order.
    pub fn send_event(&self, event: Event) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.shared.send(&self.sender, event)
    }

    /// Events dispatched after this invocation's trigger.
    ///
    /// Starts right behind the triggering event, so events produced in
    /// response to this handler's sends are never missed, however late the
    /// stream is polled.
    pub fn stream(&self) -> EventStream {
        EventStream::from_cursor(self.shared.journal.cursor(self.resume_at), None)
    }

    /// Wait for `count` events of `kind` dispatched after this invocation's
    /// trigger, returning their payloads in arrival order.
    ///
    /// Results journaled before the call are counted too, so awaiting other
    /// work first loses nothing. Events of `kind` from before the trigger are
    /// never counted.
    pub async fn barrier<T: Send + Sync + 'static>(
        &self,
        kind: &EventKind<T>,
        count: usize,
    ) -> Result<Vec<Arc<T>>> {
        self.stream().barrier(kind, count).await
    }

    /// The run's store.
    pub fn store(&self) -> &Store<S> {
        &self.shared.store
    }

    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when the run stops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves when the run stops.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `duration`, or fail with [`Error::Cancelled`] if the run stops first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run `work` in the background until it finishes or the run stops.
    ///
    /// Use this for work that outlives the handler invocation, such as timers
    /// that send events later. Background work does not hold a detached run
    /// open: it is stopped along with the run once the run drains.
    pub fn spawn<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = work => {}
            }
        })
    }

    /// Register cleanup to run when the run stops.
    pub fn on_cancel<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            cleanup();
        });
    }

    /// Process-unique run identifier.
    pub fn run_id(&self) -> u64 {
        self.shared.run_id
    }

    /// Name of the workflow this run belongs to.
    pub fn workflow_name(&self) -> &str {
        &self.shared.workflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunShared<()> {
        RunShared::new(1, Arc::from("test"), Store::new(Arc::new(|| ())), true)
    }

    #[tokio::test]
    async fn test_failure_then_cancel_keeps_failure() {
        let shared = run();
        shared.stop(RunEnd::Failed(Arc::new(Error::from("boom"))));
        shared.stop(RunEnd::Cancelled);

        assert_eq!(shared.phase(), RunPhase::Failed);
        assert!(shared.token.is_cancelled());
        let mut cursor = shared.journal.cursor(0);
        let err = cursor.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_cancel_then_failure_keeps_cancel() {
        let shared = run();
        shared.stop(RunEnd::Cancelled);
        shared.stop(RunEnd::Failed(Arc::new(Error::from("boom"))));
        shared.stop(RunEnd::Drained);

        assert_eq!(shared.phase(), RunPhase::Cancelled);
        let mut cursor = shared.journal.cursor(0);
        assert!(cursor.next().await.is_none());
    }

    #[test]
    fn test_stopped_phases() {
        assert!(!RunPhase::Idle.is_stopped());
        assert!(!RunPhase::Running.is_stopped());
        assert!(RunPhase::Cancelled.is_stopped());
        assert!(RunPhase::Failed.is_stopped());
        assert!(RunPhase::Drained.is_stopped());
    }
}
