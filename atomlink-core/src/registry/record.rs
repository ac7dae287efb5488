//! Per-atom state held by the registry.

use indexmap::IndexMap;

use super::handle::{Push, SessionHandle, SessionId, Subscriber};
use crate::protocol::{AtomId, AtomValue};

/// One shared atom: its latest value (if any) and who is listening.
#[derive(Debug)]
pub struct AtomRecord {
    key: AtomId,
    value: Option<AtomValue>,
    version: u64,
    subscribers: IndexMap<SessionId, Subscriber>,
}

impl AtomRecord {
    pub(super) fn new(key: AtomId) -> Self {
        Self {
            key,
            value: None,
            version: 0,
            subscribers: IndexMap::new(),
        }
    }

    pub fn key(&self) -> &AtomId {
        &self.key
    }

    pub fn value(&self) -> Option<&AtomValue> {
        self.value.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn has_subscriber(&self, session: SessionId) -> bool {
        self.subscribers.contains_key(&session)
    }

    /// The current value as a push, if one was ever written.
    pub fn current(&self) -> Option<Push> {
        self.value.as_ref().map(|value| Push {
            atom: self.key.clone(),
            value: value.clone(),
            version: self.version,
            epoch: 0,
        })
    }

    /// Epoch of a session's subscription to this atom.
    pub fn epoch_of(&self, session: SessionId) -> Option<u64> {
        self.subscribers.get(&session).map(|subscriber| subscriber.epoch)
    }

    /// A record with no listeners and no value carries no state.
    pub(super) fn is_vacant(&self) -> bool {
        self.subscribers.is_empty() && self.value.is_none()
    }

    /// Add a subscriber under `epoch`. An existing subscription keeps its
    /// epoch, which is returned either way.
    pub(super) fn add_subscriber(&mut self, handle: &SessionHandle, epoch: u64) -> u64 {
        self.subscribers
            .entry(handle.id())
            .or_insert_with(|| Subscriber {
                handle: handle.clone(),
                epoch,
            })
            .epoch
    }

    /// Fan-out order is unspecified, so removal swaps rather than shifts.
    pub(super) fn remove_subscriber(&mut self, session: SessionId) -> Option<u64> {
        self.subscribers
            .swap_remove(&session)
            .map(|subscriber| subscriber.epoch)
    }

    /// Last write wins: no comparison with the stored value.
    pub(super) fn store(&mut self, value: AtomValue) -> Push {
        self.version += 1;
        self.value = Some(value.clone());
        Push {
            atom: self.key.clone(),
            value,
            version: self.version,
            epoch: 0,
        }
    }

    pub(super) fn subscribers(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }
}
