//! Event streams and the combinators used to build joins.
//!
//! An [`EventStream`] yields every event of a run in dispatch order. It ends
//! when the run is cancelled or drains, and yields the run's error if a
//! handler failed.
//! Combinators are lazy and consume `self`, so a finished
//! [`until`](EventStream::until) drops its underlying subscription right away.
//!
//! # Example
//!
//! ```rust
//! use llm_flow::{EventKind, Workflow};
//!
//! # tokio_test::block_on(async {
//! let start = EventKind::<u32>::new("start");
//! let done = EventKind::<u32>::new("done");
//!
//! let mut workflow = Workflow::new();
//! let next = done.clone();
//! workflow.on(&start, move |_ctx, n| {
//!     let next = next.clone();
//!     async move { Ok(Some(next.with(*n + 1))) }
//! });
//!
//! let ctx = workflow.create_context();
//! ctx.send_event(start.with(41)).unwrap();
//!
//! let events = ctx.stream().until_kind(&done).collect().await.unwrap();
//! assert_eq!(events.len(), 2);
//! assert_eq!(done.payload_ref(&events[1]), Some(&42));
//! # });
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::sync::DropGuard;

use crate::journal::Cursor;
use crate::{Event, EventKind, Result};

/// A stream of run events: `Ok` per event, or the run's failure as the last item.
pub struct EventStream {
    inner: BoxStream<'static, Result<Event>>,
}

impl EventStream {
    /// A stream reading the journal through `cursor`.
    ///
    /// `guard` keeps the caller attached while the stream exists; handler-side
    /// streams pass `None`.
    pub(crate) fn from_cursor(cursor: Cursor, guard: Option<Arc<DropGuard>>) -> Self {
        let inner = stream::unfold((cursor, guard), |(mut cursor, guard)| async move {
            let item = cursor.next().await?;
            Some((item, (cursor, guard)))
        });
        Self::new(inner)
    }

    /// Wrap any stream of events.
    pub fn new(inner: impl Stream<Item = Result<Event>> + Send + 'static) -> Self {
        Self {
            inner: inner.boxed(),
        }
    }

    /// A stream that ends immediately.
    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// Keep only events matching `predicate`. Errors always pass.
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&Event) -> bool + Send + 'static,
    {
        Self::new(self.inner.filter(move |item| {
            future::ready(match item {
                Ok(event) => predicate(event),
                Err(_) => true,
            })
        }))
    }

    /// Keep only events of `kind`.
    pub fn filter_kind<T: Send + Sync + 'static>(self, kind: &EventKind<T>) -> Self {
        let kind = kind.clone();
        self.filter(move |event| kind.includes(event))
    }

    /// Forward events until `stop` returns `true`, including that event.
    ///
    /// An error also ends the stream after being forwarded.
    pub fn until<F>(self, stop: F) -> Self
    where
        F: FnMut(&Event) -> bool + Send + 'static,
    {
        let state = Some((self.inner, stop));
        Self::new(stream::unfold(state, |state| async move {
            let (mut inner, mut stop) = state?;
            let item = inner.next().await?;
            let finished = match &item {
                Ok(event) => stop(event),
                Err(_) => true,
            };
            // Dropping `inner` here releases the subscription before the
            // caller even asks for the next item.
            let rest = if finished { None } else { Some((inner, stop)) };
            Some((item, rest))
        }))
    }

    /// Forward events up to and including the first event of `kind`.
    pub fn until_kind<T: Send + Sync + 'static>(self, kind: &EventKind<T>) -> Self {
        let kind = kind.clone();
        self.until(move |event| kind.includes(event))
    }

    /// Exactly the next `count` events of `kind`, then end.
    pub fn take_matching<T: Send + Sync + 'static>(self, kind: &EventKind<T>, count: usize) -> Self {
        if count == 0 {
            return Self::empty();
        }
        let mut seen = 0;
        self.filter_kind(kind).until(move |_| {
            seen += 1;
            seen == count
        })
    }

    /// Drain the stream into a list, failing on the first error.
    ///
    /// Suspends until the stream ends, so it must be finite (see
    /// [`until`](Self::until)) or the run must end.
    pub async fn collect(mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(item) = self.inner.next().await {
            events.push(item?);
        }
        Ok(events)
    }

    /// Wait for `count` events of `kind` and return their payloads in arrival order.
    ///
    /// Fails with [`Error::StreamEnded`](crate::Error::StreamEnded) if the run
    /// ends first.
    pub async fn barrier<T: Send + Sync + 'static>(
        self,
        kind: &EventKind<T>,
        count: usize,
    ) -> Result<Vec<Arc<T>>> {
        let events = self.take_matching(kind, count).collect().await?;
        if events.len() < count {
            return Err(crate::Error::StreamEnded {
                expected: count,
                observed: events.len(),
            });
        }
        events
            .iter()
            .map(|event| {
                kind.payload(event).ok_or_else(|| crate::Error::PayloadMismatch {
                    kind: kind.name().to_string(),
                })
            })
            .collect()
    }
}

impl Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}
