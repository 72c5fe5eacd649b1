//! Routing from event kinds to registered handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Handler;
use crate::{EventKind, KindId};

/// The set of kinds that trigger one registration.
///
/// A registration on several kinds fires once for *each* event of *any* of
/// them; it does not wait for all of them.
///
/// ```rust
/// use llm_flow::{EventKind, KindSet};
///
/// let text = EventKind::<String>::new("text");
/// let number = EventKind::<u64>::new("number");
///
/// let kinds = KindSet::of(&text).or(&number);
/// assert!(kinds.contains(text.id()));
/// assert!(kinds.contains(number.id()));
/// assert_eq!(kinds.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindSet {
    ids: Vec<KindId>,
}

impl KindSet {
    /// A set with a single kind.
    pub fn of<T>(kind: &EventKind<T>) -> Self {
        Self { ids: vec![kind.id()] }
    }

    /// Add another kind. Duplicates are ignored.
    pub fn or<T>(mut self, kind: &EventKind<T>) -> Self {
        if !self.ids.contains(&kind.id()) {
            self.ids.push(kind.id());
        }
        self
    }

    /// Whether `id` triggers this set.
    pub fn contains(&self, id: KindId) -> bool {
        self.ids.contains(&id)
    }

    /// Kinds in insertion order.
    pub fn ids(&self) -> &[KindId] {
        &self.ids
    }

    /// Number of kinds in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty. An empty registration never fires.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<T> From<&EventKind<T>> for KindSet {
    fn from(kind: &EventKind<T>) -> Self {
        KindSet::of(kind)
    }
}

/// Registered handlers, indexed by trigger kind.
///
/// Lookup is a single hash lookup per event. Handlers matching the same event
/// are returned in registration order.
pub struct HandlerTable<S> {
    handlers: Vec<Arc<dyn Handler<S>>>,
    routes: HashMap<KindId, Vec<usize>>,
}

impl<S: Send + 'static> HandlerTable<S> {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Register `handler` for every kind in `kinds`.
    pub fn register(&mut self, kinds: KindSet, handler: Arc<dyn Handler<S>>) {
        let slot = self.handlers.len();
        self.handlers.push(handler);
        for id in kinds.ids() {
            self.routes.entry(*id).or_default().push(slot);
        }
    }

    /// Handlers triggered by events of kind `id`.
    pub fn matching(&self, id: KindId) -> impl Iterator<Item = &Arc<dyn Handler<S>>> + '_ {
        self.routes
            .get(&id)
            .into_iter()
            .flatten()
            .map(|slot| &self.handlers[*slot])
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S: Send + 'static> Default for HandlerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for HandlerTable<S> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<S> fmt::Debug for HandlerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handlers.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, HandlerContext, LambdaHandler};

    fn noop(name: &'static str) -> Arc<dyn Handler<()>> {
        Arc::new(LambdaHandler::new(name, |_ctx: HandlerContext, _event: Event| async {
            Ok(None)
        }))
    }

    fn names<'a>(table: &'a HandlerTable<()>, id: KindId) -> Vec<&'a str> {
        table.matching(id).map(|h| h.name()).collect()
    }

    #[test]
    fn test_same_kind_fires_every_registration_in_order() {
        let start = EventKind::<()>::new("start");
        let mut table = HandlerTable::new();
        table.register(KindSet::of(&start), noop("first"));
        table.register(KindSet::of(&start), noop("second"));

        assert_eq!(names(&table, start.id()), vec!["first", "second"]);
    }

    #[test]
    fn test_multi_kind_registration_routes_each_kind() {
        let a = EventKind::<u8>::new("a");
        let b = EventKind::<String>::new("b");
        let c = EventKind::<()>::new("c");
        let mut table = HandlerTable::new();
        table.register(KindSet::of(&a).or(&b).or(&a), noop("either"));

        assert_eq!(names(&table, a.id()), vec!["either"]);
        assert_eq!(names(&table, b.id()), vec!["either"]);
        assert!(names(&table, c.id()).is_empty());
        assert_eq!(table.len(), 1);
    }
}
