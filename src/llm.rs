//! The completion capability handlers call out to.
//!
//! The engine never talks to a model provider itself. Handlers that need a
//! completion receive an [`Arc<dyn Completion>`] built once at startup and
//! passed into the workflow definition, so tests can swap in
//! [`ScriptedCompletion`] or [`FnCompletion`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Error, Result};

/// Text returned by a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The completion text.
    pub text: String,
}

impl CompletionResponse {
    /// Wrap completion text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// An asynchronous prompt-in, text-out capability.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Complete `prompt`.
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse>;
}

/// Shared handle to a completion capability.
pub type SharedCompletion = Arc<dyn Completion>;

/// A fake that answers with queued replies, in order, and records prompts.
///
/// # Example
///
/// ```rust
/// use llm_flow::{Completion, ScriptedCompletion};
///
/// # tokio_test::block_on(async {
/// let llm = ScriptedCompletion::new(["first", "second"]);
/// assert_eq!(llm.complete("a").await.unwrap().text, "first");
/// assert_eq!(llm.complete("b").await.unwrap().text, "second");
/// assert!(llm.complete("c").await.is_err());
/// assert_eq!(llm.prompts(), vec!["a", "b", "c"]);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    fallback: Option<String>,
}

impl ScriptedCompletion {
    /// Queue `replies` to be returned one per request.
    pub fn new<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            fallback: None,
        }
    }

    /// Answer with `reply` once the queue is empty instead of failing.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.or_else(|| self.fallback.clone())
            .map(CompletionResponse::new)
            .ok_or_else(|| Error::Completion("no scripted reply left".to_string()))
    }
}

/// A completion computed by a synchronous closure over the prompt.
///
/// ```rust
/// use llm_flow::{Completion, FnCompletion};
///
/// # tokio_test::block_on(async {
/// let llm = FnCompletion::new(|prompt: &str| Ok(prompt.len().to_string()));
/// assert_eq!(llm.complete("four").await.unwrap().text, "4");
/// # });
/// ```
pub struct FnCompletion<F> {
    f: F,
}

impl<F> FnCompletion<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Completion for FnCompletion<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse> {
        (self.f)(prompt).map(CompletionResponse::new)
    }
}
