//! Atomlink Core
//!
//! This crate provides the runtime for Atomlink shared atoms: named, mutable
//! values held by a relay server that any number of clients can subscribe to
//! and write. Every write is fanned out to every subscriber, so a client's
//! local reactive state becomes a live mirror of the server-held value.
//!
//! It implements:
//!
//! - The wire protocol (`listen-to`, `leave`, `new-data`)
//! - A process-wide atom registry with subscriber fan-out
//! - Per-connection sessions and the WebSocket relay server
//! - A client sync adapter that binds a local signal to a remote atom
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `protocol`: Message shapes and their JSON / MessagePack encoding
//! - `registry`: Atom records, subscriber sets, and fan-out
//! - `session`: Server-side protocol handler for one connection
//! - `server`: TCP/WebSocket accept loop and relay configuration
//! - `reactive`: Local reactive values with change listeners
//! - `client`: Remote connection and `SyncedAtom` bindings
//!
//! # Example
//!
//! ```rust,ignore
//! use atomlink_core::client::{RemoteConnection, SyncedAtom};
//! use atomlink_core::protocol::AtomId;
//!
//! let conn = RemoteConnection::connect("ws://127.0.0.1:8080").await?;
//! let users = SyncedAtom::new(conn, AtomId::composite(["usersInChannel", "Channel A"]), Vec::<String>::new());
//!
//! users.activate()?;
//! users.signal().subscribe(|list| println!("users: {list:?}"));
//!
//! // Published to every other client bound to the same key
//! users.update(|list| {
//!     let mut list = list.clone();
//!     list.push("ada".into());
//!     list
//! })?;
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod reactive;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{ClientError, CodecError, ConfigError, ServerError};
