//! Client Sync Adapter
//!
//! Binds local reactive values to atoms held by a relay.
//!
//! A [`RemoteConnection`] is one WebSocket to the relay, shared by any
//! number of bindings. A [`SyncedAtom`] ties one [`Signal`] to one key:
//!
//! - [`SyncedAtom::activate`] sends `listen-to` and starts applying pushed
//!   values to the signal.
//! - [`SyncedAtom::set`] compares the new value with the current one and,
//!   only if they differ, stores it and sends `new-data`.
//! - [`SyncedAtom::deactivate`] sends `leave` and stops applying pushes.
//!
//! The relay echoes every write back to its author. Applying an echo is a
//! no-op because the value already matches, and the equality check in `set`
//! means a listener that writes back what it just received sends nothing.
//! Together these keep two clients from bouncing one value forever.
//!
//! [`Signal`]: crate::reactive::Signal

mod binding;
mod connection;

pub use binding::SyncedAtom;
pub use connection::RemoteConnection;
