//! Relay Server
//!
//! Accepts WebSocket connections and gives each one a
//! [`Session`](crate::session::Session) bound to a shared
//! [`AtomRegistry`](crate::registry::AtomRegistry).
//!
//! # Tasks
//!
//! - One accept loop, which also logs periodic registry stats.
//! - Per connection: a reader loop feeding frames to the session, and a
//!   writer task draining the session's outbound queue onto the socket.
//!
//! The registry's lock is the only point shared between connections.

mod config;
mod listener;

pub use config::{RelayConfig, DEFAULT_CONFIG_FILE};
pub use listener::{RelayServer, ShutdownHandle};
