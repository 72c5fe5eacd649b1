//! Workflow definitions.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::context::RunShared;
use crate::dispatcher::Dispatcher;
use crate::handler::{Handler, HandlerTable, KindSet, TypedHandler};
use crate::store::{Store, StoreFactory};
use crate::{Event, EventKind, HandlerContext, Result, WorkflowConfig, WorkflowContext};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// A set of handler registrations plus the settings shared by all its runs.
///
/// Handlers are registered while defining the workflow; every
/// [`create_context`](Self::create_context) call snapshots them and starts an
/// independent run.
///
/// # Example
///
/// ```rust
/// use llm_flow::{EventKind, Workflow};
///
/// # tokio_test::block_on(async {
/// let start = EventKind::<String>::new("start");
/// let stop = EventKind::<String>::new("stop");
///
/// let mut workflow = Workflow::new().with_name("echo");
/// let done = stop.clone();
/// workflow.on(&start, move |_ctx, text| {
///     let done = done.clone();
///     async move { Ok(Some(done.with(text.to_uppercase()))) }
/// });
///
/// let result = workflow.run(start.with("hello".to_string()), &stop).await.unwrap();
/// assert_eq!(result.as_str(), "HELLO");
/// # });
/// ```
pub struct Workflow<S = ()> {
    config: WorkflowConfig,
    table: HandlerTable<S>,
    factory: StoreFactory<S>,
}

impl Workflow<()> {
    /// Create an empty workflow without a store.
    pub fn new() -> Self {
        Self::with_store(|| ())
    }
}

impl Default for Workflow<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> Workflow<S> {
    /// Create an empty workflow whose runs each get a store built by `factory`.
    ///
    /// The factory runs lazily, at most once per run, the first time a
    /// handler or the caller touches the store.
    ///
    /// ```rust
    /// use llm_flow::{EventKind, Workflow};
    ///
    /// #[derive(Default)]
    /// struct Notes {
    ///     research: String,
    /// }
    ///
    /// let write = EventKind::<String>::new("write");
    /// let mut workflow = Workflow::with_store(Notes::default);
    /// workflow.on(&write, |ctx, text| async move {
    ///     ctx.store().update(|notes| notes.research.push_str(&text));
    ///     Ok(None)
    /// });
    /// ```
    pub fn with_store<F>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            config: WorkflowConfig::default(),
            table: HandlerTable::new(),
            factory: Arc::new(factory),
        }
    }

    /// Set a human-readable name for this workflow.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Fail runs that dispatch more than `limit` events.
    ///
    /// Off by default: a cycle without a terminal event runs forever.
    pub fn with_max_events(mut self, limit: usize) -> Self {
        self.config.max_events = Some(limit);
        self
    }

    /// Replace all settings at once.
    pub fn with_config(mut self, config: WorkflowConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Returns the name of this workflow.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The workflow's settings.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Number of registrations.
    pub fn handler_count(&self) -> usize {
        self.table.len()
    }

    /// Register `handler` for every event whose kind is in `kinds`.
    pub fn handle<H>(&mut self, kinds: impl Into<KindSet>, handler: H) -> &mut Self
    where
        H: Handler<S> + 'static,
    {
        self.table.register(kinds.into(), Arc::new(handler));
        self
    }

    /// Register a closure for `kind` that receives the typed payload.
    pub fn on<T, F, Fut>(&mut self, kind: &EventKind<T>, f: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(HandlerContext<S>, Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Event>>> + Send + 'static,
    {
        self.handle(kind, TypedHandler::new(kind, f))
    }

    /// Start a new run and return the caller's handle on it.
    ///
    /// Must be called from within a tokio runtime: the run's dispatcher is
    /// spawned immediately and idles until the first event is sent.
    pub fn create_context(&self) -> WorkflowContext<S> {
        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(RunShared::new(
            run_id,
            Arc::from(self.config.name.as_str()),
            Store::new(Arc::clone(&self.factory)),
            self.config.trace,
        ));
        let (sender, queue) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&shared),
            Arc::new(self.table.clone()),
            sender.clone(),
            queue,
            self.config.max_events,
        );
        let span = tracing::info_span!("run", workflow = %self.config.name, run_id);
        tokio::spawn(dispatcher.run().instrument(span));
        WorkflowContext::new(shared, sender)
    }

    /// Run once: send `seed` and wait for the first `terminal` event.
    ///
    /// Any handler failure before the terminal event is returned as `Err`.
    /// Handlers still in flight when the terminal event arrives keep running
    /// until the run drains.
    pub async fn run<T: Send + Sync + 'static>(
        &self,
        seed: Event,
        terminal: &EventKind<T>,
    ) -> Result<Arc<T>> {
        let ctx = self.create_context();
        ctx.send_event(seed)?;
        ctx.run_until(terminal).await
    }
}
