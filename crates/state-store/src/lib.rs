//! Minimal reactive state container
//!
//! A `Store<T>` holds one value of `T`. The only way to change it is
//! `patch`, which runs a mutation against the *latest* state as one
//! indivisible step and then notifies subscribers exactly once. Derived values
//! are `View`s: plain functions recomputed from the current state on every
//! read, never cached across patches.
//!
//! Two kinds of observers:
//! - `subscribe(listener)` registers a callback invoked synchronously after
//!   each patch, in patch order. Dropping the returned `Subscription`
//!   unsubscribes.
//! - `watch()` hands out a `tokio::sync::watch::Receiver` for async consumers
//!   that only care about the most recent value.
//!
//! Listeners must not call `patch` on the same store; patches are serialized
//! and a nested patch would deadlock.

mod view;

pub use view::View;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tracing::trace;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Listeners<T> = Mutex<Vec<(u64, Listener<T>)>>;

/// Reactive container for a single state value.
pub struct Store<T> {
    name: &'static str,
    tx: watch::Sender<T>,
    listeners: Arc<Listeners<T>>,
    patch_lock: Mutex<()>,
    next_listener_id: AtomicU64,
}

impl<T> Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a store. `name` only appears in trace logs.
    pub fn new(name: &'static str, initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            name,
            tx,
            listeners: Arc::new(Mutex::new(Vec::new())),
            patch_lock: Mutex::new(()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state.
    pub fn get_state(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Borrow the current state without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Compute a derived view from the current state.
    pub fn view<R>(&self, view: &View<T, R>) -> R {
        self.with_state(|state| view.compute(state))
    }

    /// Apply `mutation` to the latest state atomically, then notify.
    ///
    /// Concurrent patches are applied one at a time in arrival order. The
    /// closure always sees every previously applied patch, so it must derive
    /// new values from its argument, never from a snapshot taken earlier.
    pub fn patch<R>(&self, mutation: impl FnOnce(&mut T) -> R) -> R {
        let _serial = self.patch_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Only patches write, and they hold `patch_lock`, so nothing can land
        // between this read and the replace below.
        let mut snapshot = self.get_state();
        let output = mutation(&mut snapshot);
        self.tx.send_replace(snapshot.clone());

        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        trace!(store = self.name, listeners = listeners.len(), "patch applied");
        for listener in listeners {
            listener(&snapshot);
        }
        output
    }

    /// Register a callback invoked after every patch.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Async receiver that always observes the latest state.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of registered callback listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription<T> {
    id: u64,
    listeners: Weak<Listeners<T>>,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
