//! Atom Registry
//!
//! The registry is the single source of truth for shared atoms. It maps each
//! [`AtomId`] to an [`AtomRecord`] holding the latest value and the set of
//! sessions subscribed to it.
//!
//! # Fan-out
//!
//! [`AtomRegistry::write`] stores the value and returns a [`FanOut`]: a
//! snapshot of the subscriber set taken under the same lock as the store.
//! The caller delivers it after the lock is released, so a slow client never
//! stalls writes from anyone else. The writer itself is part of the
//! snapshot; clients rely on receiving their own echo.
//!
//! # Cleanup
//!
//! Alongside the per-atom records the registry keeps a reverse index from
//! session to the keys it subscribed to. [`AtomRegistry::drop_session`]
//! walks only that session's keys, so disconnect cost is proportional to
//! what the session held rather than to the number of atoms.
//!
//! # Concurrency
//!
//! All operations go through one `parking_lot::Mutex`. Critical sections
//! touch only in-memory maps and never await.

mod handle;
mod record;

pub use handle::{FanOut, Outbound, Push, SessionHandle, SessionId, Subscriber};
pub use record::AtomRecord;

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::protocol::{AtomId, AtomValue};

/// Counts reported by [`AtomRegistry::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub atoms: usize,
    pub sessions: usize,
    pub subscriptions: usize,
}

/// Outcome of [`AtomRegistry::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Identifies this subscription in pushes addressed to it.
    pub epoch: u64,
    /// The current value, when one has been written.
    pub catch_up: Option<Push>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    atoms: HashMap<AtomId, AtomRecord>,
    /// Reverse index: which keys each session is subscribed to.
    sessions: HashMap<SessionId, HashSet<AtomId>>,
    last_epoch: u64,
}

impl RegistryInner {
    fn record_mut(&mut self, key: &AtomId) -> &mut AtomRecord {
        self.atoms
            .entry(key.clone())
            .or_insert_with(|| AtomRecord::new(key.clone()))
    }

    fn detach(&mut self, session: SessionId, key: &AtomId) -> bool {
        let Some(record) = self.atoms.get_mut(key) else {
            return false;
        };
        let removed = record.remove_subscriber(session).is_some();
        if record.is_vacant() {
            self.atoms.remove(key);
        }
        removed
    }
}

/// Process-wide table of shared atoms.
#[derive(Debug, Default)]
pub struct AtomRegistry {
    inner: Mutex<RegistryInner>,
}

impl AtomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to `key`, creating the record if needed.
    ///
    /// The returned catch-up carries the current value when one has been
    /// written, so the caller can send it to this session. Subscribing twice
    /// keeps a single entry and its original epoch.
    pub fn subscribe(&self, handle: &SessionHandle, key: &AtomId) -> Subscription {
        let mut inner = self.inner.lock();
        let session = handle.id();
        inner.last_epoch += 1;
        let fresh = inner.last_epoch;

        let record = inner.record_mut(key);
        let epoch = record.add_subscriber(handle, fresh);
        let catch_up = record.current().map(|push| push.addressed_to(epoch));

        inner.sessions.entry(session).or_default().insert(key.clone());

        trace!(%session, atom = %key, epoch, catch_up = catch_up.is_some(), "subscribed");
        Subscription { epoch, catch_up }
    }

    /// Remove a session's subscription to `key`.
    ///
    /// Unsubscribing from a key the session never joined is a no-op and
    /// returns `false`.
    pub fn unsubscribe(&self, session: SessionId, key: &AtomId) -> bool {
        let mut inner = self.inner.lock();

        if let Some(keys) = inner.sessions.get_mut(&session) {
            keys.remove(key);
            if keys.is_empty() {
                inner.sessions.remove(&session);
            }
        }

        let removed = inner.detach(session, key);
        trace!(%session, atom = %key, removed, "unsubscribed");
        removed
    }

    /// Store `value` under `key` and snapshot who must receive it.
    pub fn write(&self, key: &AtomId, value: AtomValue) -> FanOut {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(key);
        let push = record.store(value);
        let recipients = record.subscribers().cloned().collect();

        FanOut { push, recipients }
    }

    /// Write and immediately deliver. Returns how many sessions accepted the push.
    pub fn publish(&self, key: &AtomId, value: AtomValue) -> usize {
        self.write(key, value).deliver()
    }

    /// Remove a session from every record it subscribed to.
    ///
    /// Safe to call more than once; later calls find nothing to do.
    /// Returns the number of subscriptions removed.
    pub fn drop_session(&self, session: SessionId) -> usize {
        let mut inner = self.inner.lock();
        let Some(keys) = inner.sessions.remove(&session) else {
            return 0;
        };

        let mut removed = 0;
        for key in &keys {
            if inner.detach(session, key) {
                removed += 1;
            }
        }

        debug!(%session, removed, "session dropped from registry");
        removed
    }

    /// The latest value written to `key`.
    pub fn value(&self, key: &AtomId) -> Option<AtomValue> {
        self.inner
            .lock()
            .atoms
            .get(key)
            .and_then(|record| record.value().cloned())
    }

    pub fn subscriber_count(&self, key: &AtomId) -> usize {
        self.inner
            .lock()
            .atoms
            .get(key)
            .map_or(0, AtomRecord::subscriber_count)
    }

    pub fn is_subscribed(&self, session: SessionId, key: &AtomId) -> bool {
        self.inner
            .lock()
            .atoms
            .get(key)
            .is_some_and(|record| record.has_subscriber(session))
    }

    /// Keys a session is currently subscribed to, sorted.
    pub fn subscriptions_of(&self, session: SessionId) -> Vec<AtomId> {
        let inner = self.inner.lock();
        let mut keys: Vec<AtomId> = inner
            .sessions
            .get(&session)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn atom_count(&self) -> usize {
        self.inner.lock().atoms.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            atoms: inner.atoms.len(),
            sessions: inner.sessions.len(),
            subscriptions: inner.sessions.values().map(HashSet::len).sum(),
        }
    }
}
