//! Signal Implementation
//!
//! A Signal holds a value and notifies its listeners when the value changes.
//!
//! # How Signals Work
//!
//! 1. Listeners are attached with [`Signal::subscribe`] and detached with
//!    [`Signal::unsubscribe`].
//!
//! 2. [`Signal::set`] stores the value and runs every listener with it.
//!
//! 3. [`Signal::set_if_changed`] first compares against the current value
//!    using an [`Equality`] predicate and does nothing when they match.
//!
//! # Thread Safety
//!
//! Signals are shared across threads: the remote connection's reader task
//! applies pushes while application code reads and writes from elsewhere.
//! The value and the listener list sit behind separate `parking_lot` locks,
//! and listeners are always invoked with no lock held, so a listener may
//! freely read or write the signal that called it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::subscriber::ListenerId;

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Pluggable equality predicate.
pub type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A reactive value of type `T`.
///
/// Cloning a signal yields another handle to the same value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// count.subscribe(|v| println!("count is now {v}"));
///
/// count.set(5); // prints "count is now 5"
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    id: u64,

    /// Compare-then-store happens under one write guard.
    value: Arc<RwLock<T>>,

    listeners: Arc<RwLock<Vec<(ListenerId, Listener<T>)>>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_signal_id(),
            value: Arc::new(RwLock::new(value)),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    /// Store a new value and notify listeners unconditionally.
    pub fn set(&self, value: T) {
        *self.value.write() = value.clone();

        self.notify(&value);
    }

    /// Store `value` only if `eq` says it differs from the current value.
    ///
    /// Returns the previous value when a change was made.
    pub fn set_if_changed(&self, value: T, eq: &(dyn Fn(&T, &T) -> bool + Send + Sync)) -> Option<T> {
        let previous = {
            let mut guard = self.value.write();
            if eq(&*guard, &value) {
                return None;
            }
            std::mem::replace(&mut *guard, value.clone())
        };

        self.notify(&value);
        Some(previous)
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let mut guard = self.value.write();
            let next = f(&*guard);
            *guard = next.clone();
            next
        };
        self.notify(&new_value);
    }

    /// Attach a listener that runs after every accepted change.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Detach a listener. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Get the number of listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, value: &T) {
        // Snapshot so listeners run without the lock held.
        let listeners: Vec<Listener<T>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(value);
        }
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
