//! # llm-flow
//!
//! An event-driven workflow engine for LLM pipelines in Rust.
//!
//! A workflow is a set of handlers keyed by typed event kinds. Each run gets
//! its own context: events sent into it are dispatched in FIFO order to every
//! matching handler, handlers react by sending or returning further events,
//! and callers observe the run as an asynchronous [`EventStream`].
//!
//! ## Core Concepts
//!
//! - **EventKind**: A typed identity token; `kind.with(payload)` builds an [`Event`]
//! - **Workflow**: Handler registrations plus run settings
//! - **WorkflowContext**: The caller's handle on one run
//! - **HandlerContext**: What a handler gets: send, stream, store, cancellation
//! - **EventStream**: Ordered run events with `filter`, `until` and `collect`
//! - **Store**: Lazily built per-run state
//! - **RunMetrics / TraceEntry**: Counters and a structured trace of each run
//!
//! ## Example: Fan-out and Join
//!
//! ```rust
//! use llm_flow::{EventKind, Workflow};
//!
//! # tokio_test::block_on(async {
//! let start = EventKind::<String>::new("start");
//! let section = EventKind::<String>::new("section");
//! let done = EventKind::<String>::new("done");
//! let stop = EventKind::<String>::new("stop");
//!
//! let mut workflow = Workflow::new().with_name("sectioning");
//!
//! let (fan_out, joined, finish) = (section.clone(), done.clone(), stop.clone());
//! workflow.on(&start, move |ctx, topic| {
//!     let (fan_out, joined, finish) = (fan_out.clone(), joined.clone(), finish.clone());
//!     async move {
//!         for part in ["intro", "body", "outro"] {
//!             ctx.send_event(fan_out.with(format!("{topic}: {part}")))?;
//!         }
//!         let parts = ctx.barrier(&joined, 3).await?;
//!         Ok(Some(finish.with(format!("{} sections", parts.len()))))
//!     }
//! });
//!
//! let finished = done.clone();
//! workflow.on(&section, move |_ctx, text| {
//!     let finished = finished.clone();
//!     async move { Ok(Some(finished.with(text.to_uppercase()))) }
//! });
//!
//! let result = workflow.run(start.with("unicorns".to_string()), &stop).await.unwrap();
//! assert_eq!(result.as_str(), "3 sections");
//! # });
//! ```

pub mod config;
pub mod context;
pub mod cycle;
mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
mod journal;
pub mod llm;
pub mod metrics;
pub mod sse;
pub mod store;
pub mod stream;
pub mod trace;
pub mod workflow;

pub use config::WorkflowConfig;
pub use context::{HandlerContext, RunPhase, WorkflowContext};
pub use cycle::Cycle;
pub use error::{Error, Result};
pub use event::{define_event, Event, EventKind, KindId};
pub use handler::{Handler, HandlerTable, KindSet, LambdaHandler, TypedHandler};
pub use llm::{Completion, CompletionResponse, FnCompletion, ScriptedCompletion, SharedCompletion};
pub use metrics::RunMetrics;
pub use store::Store;
pub use stream::EventStream;
pub use trace::{RunEvent, TraceEntry};
pub use workflow::Workflow;
