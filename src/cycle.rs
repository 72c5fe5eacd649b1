//! Bounded loop state.
//!
//! Looping workflows re-emit an earlier kind until some condition holds. A
//! [`Cycle`] carries the loop's value together with an explicit iteration
//! count and limit, so a loop that never converges fails with
//! [`Error::CycleLimit`] instead of running forever.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A loop value with a bounded number of iterations.
///
/// # Example
///
/// ```rust
/// use llm_flow::{Cycle, Error};
///
/// let cycle = Cycle::new(String::from("draft"), 2);
/// let cycle = cycle.advance(|text| text + " v2").unwrap();
/// let cycle = cycle.advance(|text| text + " v3").unwrap();
/// assert_eq!(cycle.value(), "draft v2 v3");
/// assert!(cycle.is_exhausted());
///
/// let err = cycle.advance(|text| text).unwrap_err();
/// assert!(matches!(err, Error::CycleLimit { limit: 2 }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle<T> {
    value: T,
    iteration: u32,
    limit: u32,
}

impl<T> Cycle<T> {
    /// Start a loop at iteration zero that may advance `limit` times.
    pub fn new(value: T, limit: u32) -> Self {
        Self {
            value,
            iteration: 0,
            limit,
        }
    }

    /// Move to the next iteration, transforming the value.
    pub fn advance(self, f: impl FnOnce(T) -> T) -> Result<Self> {
        if self.is_exhausted() {
            return Err(Error::CycleLimit { limit: self.limit });
        }
        Ok(Self {
            value: f(self.value),
            iteration: self.iteration + 1,
            limit: self.limit,
        })
    }

    /// The current value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Iterations completed so far.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Maximum number of iterations.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Iterations left before the limit.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.iteration)
    }

    /// Whether another [`advance`](Self::advance) would fail.
    pub fn is_exhausted(&self) -> bool {
        self.iteration >= self.limit
    }

    /// Consume the cycle, returning its value.
    pub fn into_value(self) -> T {
        self.value
    }
}
