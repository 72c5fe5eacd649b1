//! Typed event kinds and event instances.
//!
//! An [`EventKind<T>`] is an identity token: it is created once when a workflow
//! is defined and shared by every run of that workflow. Two kinds are equal
//! only if they are the same kind, never because their payload types match.
//! An [`Event`] is one occurrence of a kind together with its payload.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::{Error, Result};

static NEXT_KIND_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`EventKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindId(u64);

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Payload = Arc<dyn Any + Send + Sync>;
type Encoder =
    fn(&(dyn Any + Send + Sync + 'static)) -> Option<serde_json::Result<serde_json::Value>>;

struct KindMeta {
    id: KindId,
    name: Cow<'static, str>,
    encode: Option<Encoder>,
}

fn encode_payload<T: Serialize + 'static>(
    payload: &(dyn Any + Send + Sync + 'static),
) -> Option<serde_json::Result<serde_json::Value>> {
    payload.downcast_ref::<T>().map(serde_json::to_value)
}

/// A typed event kind carrying payloads of type `T`.
///
/// Cloning a kind is cheap and yields the *same* kind.
///
/// # Example
///
/// ```rust
/// use llm_flow::EventKind;
///
/// let start = EventKind::<String>::new("start");
/// let other = EventKind::<String>::new("start");
///
/// let event = start.with("I am some data".to_string());
/// assert!(start.includes(&event));
/// assert!(!other.includes(&event));
/// assert_eq!(start.payload_ref(&event).map(String::as_str), Some("I am some data"));
/// ```
pub struct EventKind<T> {
    meta: Arc<KindMeta>,
    _payload: PhantomData<fn() -> T>,
}

/// Defines a new event kind. Shorthand for [`EventKind::new`].
pub fn define_event<T: Send + Sync + 'static>(name: impl Into<Cow<'static, str>>) -> EventKind<T> {
    EventKind::new(name)
}

impl<T: Send + Sync + 'static> EventKind<T> {
    /// Create a fresh kind. The name is only used for logs and traces.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_encoder(name.into(), None)
    }

    fn with_encoder(name: Cow<'static, str>, encode: Option<Encoder>) -> Self {
        let id = KindId(NEXT_KIND_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            meta: Arc::new(KindMeta { id, name, encode }),
            _payload: PhantomData,
        }
    }

    /// Construct an event of this kind.
    pub fn with(&self, payload: T) -> Event {
        Event {
            kind: Arc::clone(&self.meta),
            payload: Arc::new(payload),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Returns `true` if `event` is an occurrence of this kind.
    pub fn includes(&self, event: &Event) -> bool {
        self.meta.id == event.kind.id
    }

    /// Shared handle to the event's payload, if the event is of this kind.
    pub fn payload(&self, event: &Event) -> Option<Arc<T>> {
        if !self.includes(event) {
            return None;
        }
        Arc::clone(&event.payload).downcast::<T>().ok()
    }

    /// Borrow the event's payload, if the event is of this kind.
    pub fn payload_ref<'a>(&self, event: &'a Event) -> Option<&'a T> {
        if !self.includes(event) {
            return None;
        }
        event.payload.downcast_ref::<T>()
    }
}

impl<T: Serialize + Send + Sync + 'static> EventKind<T> {
    /// Create a fresh kind whose payloads can be encoded as JSON.
    ///
    /// Required for events relayed through [`sse`](crate::sse).
    pub fn serializable(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_encoder(name.into(), Some(encode_payload::<T>))
    }
}

impl<T> EventKind<T> {
    /// The identity of this kind.
    pub fn id(&self) -> KindId {
        self.meta.id
    }

    /// The debug name given at definition time.
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

impl<T> Clone for EventKind<T> {
    fn clone(&self) -> Self {
        Self {
            meta: Arc::clone(&self.meta),
            _payload: PhantomData,
        }
    }
}

impl<T> PartialEq for EventKind<T> {
    fn eq(&self, other: &Self) -> bool {
        self.meta.id == other.meta.id
    }
}

impl<T> Eq for EventKind<T> {}

impl<T> fmt::Debug for EventKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventKind")
            .field("name", &self.meta.name)
            .field("id", &self.meta.id)
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

/// One occurrence of an event kind.
///
/// Events are immutable; cloning shares the payload. The sequence number is
/// assigned at creation from a process-wide counter.
#[derive(Clone)]
pub struct Event {
    kind: Arc<KindMeta>,
    payload: Payload,
    sequence: u64,
}

impl Event {
    /// Identity of this event's kind.
    pub fn kind_id(&self) -> KindId {
        self.kind.id
    }

    /// Debug name of this event's kind.
    pub fn kind_name(&self) -> &str {
        &self.kind.name
    }

    /// Creation-order tag.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encode the payload as JSON.
    ///
    /// Fails with [`Error::NotSerializable`] unless the kind was created with
    /// [`EventKind::serializable`].
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let encode = self.kind.encode.ok_or_else(|| Error::NotSerializable {
            kind: self.kind.name.to_string(),
        })?;
        match encode(self.payload.as_ref()) {
            Some(encoded) => Ok(encoded?),
            None => Err(Error::PayloadMismatch {
                kind: self.kind.name.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind.name)
            .field("kind_id", &self.kind.id)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind.name, self.sequence)
    }
}
