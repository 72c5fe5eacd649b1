//! Event handlers.
//!
//! A [`Handler`] reacts to one dispatched event. It may await arbitrary async
//! work, send any number of events through its [`HandlerContext`], and
//! finally return one more event (or `None`).

use async_trait::async_trait;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use crate::{Error, Event, EventKind, HandlerContext, Result};

pub mod table;

pub use table::{HandlerTable, KindSet};

/// The fundamental trait for workflow reactions.
///
/// `S` is the run's store type (see [`Store`](crate::Store)).
#[async_trait]
pub trait Handler<S>: Send + Sync {
    /// React to `event`, optionally returning a follow-up event.
    async fn call(&self, ctx: HandlerContext<S>, event: Event) -> Result<Option<Event>>;

    /// Returns a human-readable name for this handler. Defaults to the type name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A handler built from a closure over the raw [`Event`].
///
/// # Example
///
/// ```rust
/// use llm_flow::{EventKind, LambdaHandler, Workflow};
///
/// let tick = EventKind::<u32>::new("tick");
/// let watched = tick.clone();
/// let handler = LambdaHandler::new("log-ticks", move |_ctx, event| {
///     let seen = watched.payload(&event);
///     async move {
///         println!("tick {seen:?}");
///         Ok(None)
///     }
/// });
///
/// let mut workflow = Workflow::new();
/// workflow.handle(&tick, handler);
/// ```
pub struct LambdaHandler<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> LambdaHandler<F> {
    /// Create a new named handler from the given closure.
    pub fn new<S, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        S: Send + 'static,
        F: Fn(HandlerContext<S>, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Event>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<S, F, Fut> Handler<S> for LambdaHandler<F>
where
    S: Send + 'static,
    F: Fn(HandlerContext<S>, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Event>>> + Send + 'static,
{
    async fn call(&self, ctx: HandlerContext<S>, event: Event) -> Result<Option<Event>> {
        (self.f)(ctx, event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A handler bound to one kind that receives the typed payload.
///
/// Built by [`Workflow::on`](crate::Workflow::on).
pub struct TypedHandler<T, F> {
    kind: EventKind<T>,
    name: String,
    f: F,
}

impl<T, F> TypedHandler<T, F> {
    /// Create a handler for `kind`, named after it.
    pub fn new(kind: &EventKind<T>, f: F) -> Self {
        Self {
            name: format!("on:{}", kind.name()),
            kind: kind.clone(),
            f,
        }
    }
}

#[async_trait]
impl<S, T, F, Fut> Handler<S> for TypedHandler<T, F>
where
    S: Send + 'static,
    T: Send + Sync + 'static,
    F: Fn(HandlerContext<S>, Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Event>>> + Send + 'static,
{
    async fn call(&self, ctx: HandlerContext<S>, event: Event) -> Result<Option<Event>> {
        let payload = self.kind.payload(&event).ok_or_else(|| Error::PayloadMismatch {
            kind: event.kind_name().to_string(),
        })?;
        (self.f)(ctx, payload).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
