//! Append-only event log backing every stream of a run.
//!
//! Subscribers are plain cursors into the log, so a subscription never misses
//! an event that was dispatched before it started polling, and dropping a
//! subscription releases nothing but the cursor. Wakeups go through a
//! [`tokio::sync::watch`] channel.
//!
//! The log keeps every event for the lifetime of the run. A run that cycles
//! forever without a reader grows without bound; see
//! [`WorkflowConfig::max_events`](crate::WorkflowConfig::max_events).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::{Error, Event, Result};

/// How a run stopped dispatching.
#[derive(Debug, Clone)]
pub(crate) enum RunEnd {
    Cancelled,
    Failed(Arc<Error>),
    Drained,
}

#[derive(Debug, Default)]
struct JournalState {
    events: Vec<Event>,
    end: Option<RunEnd>,
}

#[derive(Debug)]
pub(crate) struct Journal {
    state: Mutex<JournalState>,
    changes: watch::Sender<()>,
}

impl Journal {
    pub(crate) fn new() -> Self {
        let (changes, _) = watch::channel(());
        Self {
            state: Mutex::new(JournalState::default()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event, returning its position. Ignored once the run ended.
    pub(crate) fn push(&self, event: Event) -> Option<usize> {
        let position = {
            let mut state = self.lock();
            if state.end.is_some() {
                return None;
            }
            state.events.push(event);
            state.events.len() - 1
        };
        self.changes.send_replace(());
        Some(position)
    }

    /// Record how the run ended. The first end wins.
    pub(crate) fn finish(&self, end: RunEnd) {
        {
            let mut state = self.lock();
            if state.end.is_some() {
                return;
            }
            state.end = Some(end);
        }
        self.changes.send_replace(());
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// A cursor starting at `position`.
    pub(crate) fn cursor(self: &Arc<Self>, position: usize) -> Cursor {
        Cursor {
            journal: Arc::clone(self),
            position,
            changes: self.changes.subscribe(),
            done: false,
        }
    }
}

enum Peek {
    Ready(Event),
    Failed(Error),
    Ended,
    Pending,
}

/// One reader's position in the journal.
pub(crate) struct Cursor {
    journal: Arc<Journal>,
    position: usize,
    changes: watch::Receiver<()>,
    done: bool,
}

impl Cursor {
    fn peek(&mut self) -> Peek {
        let state = self.journal.lock();
        if let Some(event) = state.events.get(self.position) {
            self.position += 1;
            return Peek::Ready(event.clone());
        }
        match &state.end {
            Some(RunEnd::Cancelled | RunEnd::Drained) => Peek::Ended,
            Some(RunEnd::Failed(err)) => Peek::Failed(Error::replay(err)),
            None => Peek::Pending,
        }
    }

    /// Next event, the run's failure, or `None` once the run ended.
    ///
    /// Events journaled before the run ended are still delivered.
    pub(crate) async fn next(&mut self) -> Option<Result<Event>> {
        if self.done {
            return None;
        }
        loop {
            // Mark the current version seen before inspecting the log, so a
            // push racing with this check still wakes us.
            let _ = self.changes.borrow_and_update();
            match self.peek() {
                Peek::Ready(event) => return Some(Ok(event)),
                Peek::Failed(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
                Peek::Ended => {
                    self.done = true;
                    return None;
                }
                Peek::Pending => {}
            }
            if self.changes.changed().await.is_err() {
                self.done = true;
                return None;
            }
        }
    }
}
