//! Reactive Values
//!
//! The client sync adapter binds a remote atom to a local [`Signal`]. A
//! signal holds a value and a list of listeners; every accepted change runs
//! each listener with the new value, which is how a UI layer re-renders or
//! re-triggers downstream work.
//!
//! Writes can be filtered through an equality predicate
//! ([`Signal::set_if_changed`]). The sync adapter relies on this to treat a
//! deep-equal value as no change at all, which is what stops a write from
//! echoing back and forth between clients forever.

mod signal;
mod subscriber;

pub use signal::{Equality, Signal};
pub use subscriber::ListenerId;
