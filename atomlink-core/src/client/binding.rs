//! Binding between a local signal and a remote atom.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::connection::RemoteConnection;
use crate::error::ClientError;
use crate::protocol::{AtomId, AtomValue};
use crate::reactive::{Equality, ListenerId, Signal};

/// Deep equality through the wire representation.
fn structural_eq<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// A [`Signal`] kept in sync with one atom on the relay.
///
/// The binding is inactive until [`activate`](Self::activate) is called.
/// While inactive, [`set`](Self::set) only changes the local value.
/// Dropping an active binding deactivates it.
///
/// # Example
///
/// ```rust,ignore
/// let typing = SyncedAtom::new(conn, AtomId::from("typing/Channel A"), false);
/// typing.activate()?;
/// typing.set(true)?;   // sends new-data
/// typing.set(true)?;   // equal to the current value: nothing sent
/// ```
pub struct SyncedAtom<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    atom: AtomId,
    connection: RemoteConnection,
    signal: Signal<T>,
    equality: Equality<T>,
    on_leave: Option<T>,
    /// Handler installed on the connection while active.
    handler: Mutex<Option<ListenerId>>,
}

impl<T> SyncedAtom<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Bind a new signal holding `initial` to `atom`.
    pub fn new(connection: RemoteConnection, atom: AtomId, initial: T) -> Self {
        Self::with_signal(connection, atom, Signal::new(initial))
    }

    /// Bind an existing signal to `atom`.
    pub fn with_signal(connection: RemoteConnection, atom: AtomId, signal: Signal<T>) -> Self {
        Self {
            atom,
            connection,
            signal,
            equality: Arc::new(structural_eq::<T>),
            on_leave: None,
            handler: Mutex::new(None),
        }
    }

    /// Replace the structural equality used to detect changes.
    pub fn with_equality<F>(mut self, equality: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.equality = Arc::new(equality);
        self
    }

    /// Write `value` to the atom when the binding is deactivated.
    pub fn set_on_leave(mut self, value: T) -> Self {
        self.on_leave = Some(value);
        self
    }

    pub fn atom(&self) -> &AtomId {
        &self.atom
    }

    pub fn signal(&self) -> &Signal<T> {
        &self.signal
    }

    pub fn connection(&self) -> &RemoteConnection {
        &self.connection
    }

    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn is_active(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Subscribe to the atom and start applying pushed values.
    ///
    /// Calling this on an active binding does nothing.
    pub fn activate(&self) -> Result<(), ClientError> {
        let mut handler = self.handler.lock();
        if handler.is_some() {
            return Ok(());
        }

        let atom = self.atom.clone();
        let signal = self.signal.clone();
        let equality = Arc::clone(&self.equality);
        let id = self.connection.join(&self.atom, move |value| {
            apply_remote(&atom, &signal, &*equality, value);
        })?;

        *handler = Some(id);
        debug!(atom = %self.atom, "binding activated");
        Ok(())
    }

    /// Stop applying pushes and unsubscribe.
    ///
    /// The connection leaves the atom only when no other binding on it still
    /// listens. The handler is released even if publishing the `on_leave`
    /// value fails; the first error is returned. Calling this on an inactive
    /// binding does nothing.
    pub fn deactivate(&self) -> Result<(), ClientError> {
        let Some(id) = self.handler.lock().take() else {
            return Ok(());
        };

        let published = match &self.on_leave {
            Some(value) => self.publish(value),
            None => Ok(()),
        };
        let released = self.connection.release(&self.atom, id);
        debug!(atom = %self.atom, left = matches!(released, Ok(true)), "binding deactivated");
        published.and(released.map(|_| ()))
    }

    /// Set the local value, publishing it if it differs from the current one.
    ///
    /// Returns `Ok(false)` when the value was equal and nothing happened.
    pub fn set(&self, value: T) -> Result<bool, ClientError> {
        if self.signal.set_if_changed(value.clone(), &*self.equality).is_none() {
            trace!(atom = %self.atom, "unchanged value not published");
            return Ok(false);
        }

        if self.is_active() {
            self.publish(&value)?;
        }
        Ok(true)
    }

    /// Set the value to a function of the current one.
    pub fn update<F>(&self, f: F) -> Result<bool, ClientError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = self.signal.with(f);
        self.set(next)
    }

    fn publish(&self, value: &T) -> Result<(), ClientError> {
        let payload = AtomValue::from_serialize(value).map_err(|source| ClientError::Serialize {
            atom: self.atom.to_string(),
            source,
        })?;
        self.connection.publish(&self.atom, payload)
    }
}

fn apply_remote<T>(
    atom: &AtomId,
    signal: &Signal<T>,
    equality: &(dyn Fn(&T, &T) -> bool + Send + Sync),
    value: &AtomValue,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    match value.deserialize_into::<T>() {
        Ok(next) => {
            if signal.set_if_changed(next, equality).is_some() {
                trace!(%atom, "applied remote value");
            }
        }
        Err(error) => warn!(%atom, %error, "remote value does not match local type"),
    }
}

impl<T> Drop for SyncedAtom<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Err(error) = self.deactivate() {
            debug!(atom = %self.atom, %error, "deactivate on drop failed");
        }
    }
}

impl<T> fmt::Debug for SyncedAtom<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedAtom")
            .field("atom", &self.atom)
            .field("value", &self.signal.get())
            .field("active", &self.is_active())
            .finish()
    }
}
