//! Run-scoped mutable state.
//!
//! A [`Store`] lives exactly as long as one run. The workflow's factory is
//! invoked lazily, on first access, and at most once per run; every handler of
//! that run sees the same instance.
//!
//! Access is serialized by a mutex. The closures passed to [`Store::with`] and
//! [`Store::update`] run synchronously, so the lock is never held across an
//! `.await`. The lock is not re-entrant: touching the same store again from
//! inside one of those closures panics instead of deadlocking.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

pub(crate) type StoreFactory<S> = Arc<dyn Fn() -> S + Send + Sync>;

static NEXT_THREAD_TAG: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TAG: u64 = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
}

fn thread_tag() -> u64 {
    THREAD_TAG.with(|tag| *tag)
}

/// State shared by all handlers of one run.
pub struct Store<S> {
    cell: OnceLock<Mutex<S>>,
    factory: StoreFactory<S>,
    /// Tag of the thread holding the lock, 0 when free.
    holder: AtomicU64,
}

/// The locked state, remembering which thread holds it.
struct Held<'a, S> {
    guard: MutexGuard<'a, S>,
    holder: &'a AtomicU64,
}

impl<S> Deref for Held<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> DerefMut for Held<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

impl<S> Drop for Held<'_, S> {
    fn drop(&mut self) {
        self.holder.store(0, Ordering::Release);
    }
}

impl<S> Store<S> {
    pub(crate) fn new(factory: StoreFactory<S>) -> Self {
        Self {
            cell: OnceLock::new(),
            factory,
            holder: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Held<'_, S> {
        let tag = thread_tag();
        // Only this thread ever writes its own tag, so a match means the
        // lock is already held further up this thread's stack.
        if self.holder.load(Ordering::Acquire) == tag {
            panic!("store accessed from inside its own with/update closure");
        }
        let guard = self
            .cell
            .get_or_init(|| Mutex::new((self.factory)()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.holder.store(tag, Ordering::Release);
        Held {
            guard,
            holder: &self.holder,
        }
    }

    /// Read the state.
    ///
    /// # Panics
    ///
    /// If `f` accesses this store again. Read what you need first, or do all
    /// the work inside one closure.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let held = self.lock();
        f(&*held)
    }

    /// Mutate the state in place.
    ///
    /// # Panics
    ///
    /// If `f` accesses this store again.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut held = self.lock();
        f(&mut *held)
    }

    /// Clone the current state.
    pub fn get(&self) -> S
    where
        S: Clone,
    {
        S::clone(&self.lock())
    }

    /// Whether the factory has run for this run yet.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("type", &std::any::type_name::<S>())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_factory_runs_lazily_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = Store::<Vec<String>>::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::<String>::new()
        }));

        assert!(!store.is_initialized());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.update(|notes| notes.push("first".to_string()));
        store.update(|notes| notes.push("second".to_string()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(store.with(Vec::len), 2);
    }

    #[test]
    #[should_panic(expected = "store accessed from inside its own with/update closure")]
    fn test_nested_access_panics_instead_of_deadlocking() {
        let store = Store::<Vec<u32>>::new(Arc::new(|| vec![1, 2]));
        store.with(|numbers| numbers.len() + store.get().len());
    }

    #[test]
    fn test_store_usable_after_closure_returns() {
        let store = Store::<u32>::new(Arc::new(|| 0));
        store.update(|n| *n += 1);
        let outer = store.with(|n| *n);
        store.update(|n| *n += outer);
        assert_eq!(store.get(), 2);
    }
}
