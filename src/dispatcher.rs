//! The run loop.
//!
//! One dispatcher task drives each run. It takes events off the run's FIFO
//! queue, appends them to the journal every stream reads, and spawns one task
//! per matching handler. When a handler finishes, its returned event goes to
//! the back of the same queue, behind everything the handler sent while it
//! ran.
//!
//! ```text
//!  send_event ──┐
//!               ▼
//!          [ FIFO queue ] ──► dispatch ──► journal ──► EventStreams
//!               ▲                 │
//!               │                 └──► JoinSet: handler tasks
//!               └──── returned event ◄──────┘
//! ```
//!
//! The loop runs until the run is cancelled, a handler fails, or the optional
//! event limit is hit. Once the caller has dropped every handle it also stops
//! on its own, as soon as the queue is empty and no handler is in flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::RunShared;
use crate::handler::{Handler, HandlerTable};
use crate::journal::RunEnd;
use crate::trace::RunEvent;
use crate::{Error, Event, HandlerContext, Result};

/// Outcome of one handler invocation.
struct Invocation {
    handler: String,
    duration_ms: u128,
    result: Result<Option<Event>>,
}

pub(crate) struct Dispatcher<S> {
    shared: Arc<RunShared<S>>,
    table: Arc<HandlerTable<S>>,
    sender: mpsc::UnboundedSender<Event>,
    queue: mpsc::UnboundedReceiver<Event>,
    max_events: Option<usize>,
}

impl<S: Send + 'static> Dispatcher<S> {
    pub(crate) fn new(
        shared: Arc<RunShared<S>>,
        table: Arc<HandlerTable<S>>,
        sender: mpsc::UnboundedSender<Event>,
        queue: mpsc::UnboundedReceiver<Event>,
        max_events: Option<usize>,
    ) -> Self {
        Self {
            shared,
            table,
            sender,
            queue,
            max_events,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut in_flight: JoinSet<Invocation> = JoinSet::new();
        let token = self.shared.token.clone();
        let detached = self.shared.detached.clone();
        let mut attached = true;
        info!(run_id = self.shared.run_id, "run started");

        let end = loop {
            if !attached && in_flight.is_empty() {
                // Without caller handles or running handlers, only the queue
                // is left to feed the run.
                match self.queue.try_recv() {
                    Ok(event) => {
                        if let Err(err) = self.dispatch(event, &mut in_flight) {
                            break RunEnd::Failed(Arc::new(err));
                        }
                        continue;
                    }
                    Err(_) => break RunEnd::Drained,
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break RunEnd::Cancelled,
                _ = detached.cancelled(), if attached => {
                    debug!(run_id = self.shared.run_id, "caller detached");
                    attached = false;
                }
                Some(event) = self.queue.recv() => {
                    if let Err(err) = self.dispatch(event, &mut in_flight) {
                        break RunEnd::Failed(Arc::new(err));
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    // Aborted tasks only show up after cancellation.
                    let Ok(invocation) = joined else { continue };
                    if let Err(err) = self.complete(invocation) {
                        break RunEnd::Failed(Arc::new(err));
                    }
                }
            }
        };

        let reason = match &end {
            RunEnd::Cancelled => {
                info!(run_id = self.shared.run_id, "run cancelled");
                "cancelled".to_string()
            }
            RunEnd::Failed(err) => {
                warn!(run_id = self.shared.run_id, error = %err, "run failed");
                err.to_string()
            }
            RunEnd::Drained => {
                info!(run_id = self.shared.run_id, "run drained");
                "drained".to_string()
            }
        };
        self.shared.emit(RunEvent::Stopped { reason });
        self.shared.stop(end);
        in_flight.shutdown().await;
    }

    fn dispatch(&mut self, event: Event, in_flight: &mut JoinSet<Invocation>) -> Result<()> {
        let handlers: Vec<Arc<dyn Handler<S>>> =
            self.table.matching(event.kind_id()).cloned().collect();

        if let Some(limit) = self.max_events {
            if self.shared.metrics().events_dispatched >= limit {
                warn!(run_id = self.shared.run_id, limit, "event limit exceeded");
                return Err(Error::EventLimitExceeded { limit });
            }
        }

        let Some(position) = self.shared.journal.push(event.clone()) else {
            return Ok(());
        };
        self.shared.metrics().record_dispatch(handlers.len());
        debug!(
            run_id = self.shared.run_id,
            kind = event.kind_name(),
            sequence = event.sequence(),
            handlers = handlers.len(),
            "dispatch"
        );
        self.shared.emit(RunEvent::EventDispatched {
            kind: event.kind_name().to_string(),
            sequence: event.sequence(),
            handlers: handlers.len(),
        });

        for handler in handlers {
            let ctx = HandlerContext::new(Arc::clone(&self.shared), self.sender.clone(), position);
            self.shared.emit(RunEvent::HandlerStart {
                handler: handler.name().to_string(),
                kind: event.kind_name().to_string(),
            });
            in_flight.spawn(invoke(handler, ctx, event.clone()));
        }
        Ok(())
    }

    fn complete(&mut self, invocation: Invocation) -> Result<()> {
        let Invocation {
            handler,
            duration_ms,
            result,
        } = invocation;

        match result {
            Ok(emitted) => {
                debug!(
                    run_id = self.shared.run_id,
                    handler = %handler,
                    duration_ms = duration_ms as u64,
                    "handler finished"
                );
                self.shared.metrics().record_completion();
                self.shared.emit(RunEvent::HandlerEnd {
                    handler,
                    duration_ms,
                    emitted: emitted.as_ref().map(|e| e.kind_name().to_string()),
                });
                if let Some(event) = emitted {
                    // The queue is the only way in, so ordering stays FIFO.
                    self.sender.send(event).map_err(|_| Error::Cancelled)?;
                }
                Ok(())
            }
            Err(err) => {
                warn!(run_id = self.shared.run_id, handler = %handler, error = %err, "handler failed");
                self.shared.metrics().record_failure(err.to_string());
                self.shared.emit(RunEvent::HandlerError {
                    handler: handler.clone(),
                    message: err.to_string(),
                });
                Err(Error::HandlerFailed {
                    handler,
                    source: Arc::new(err),
                })
            }
        }
    }
}

async fn invoke<S: Send + 'static>(
    handler: Arc<dyn Handler<S>>,
    ctx: HandlerContext<S>,
    event: Event,
) -> Invocation {
    let name = handler.name().to_string();
    let started = Instant::now();
    let result = match AssertUnwindSafe(handler.call(ctx, event)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Message(panic_message(panic.as_ref()))),
    };
    Invocation {
        handler: name,
        duration_ms: started.elapsed().as_millis(),
        result,
    }
}

fn panic_message(panic: &(dyn Any + Send + 'static)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}
