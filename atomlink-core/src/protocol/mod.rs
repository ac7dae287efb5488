//! Wire Protocol
//!
//! Three message shapes travel over a connection, discriminated by a `type`
//! tag:
//!
//! ```text
//! { "type": "listen-to", "atomId": "..." }
//! { "type": "leave",     "atomId": "...", "msgId": "..." }
//! { "type": "new-data",  "atomId": "...", "msgId": "...", "newData": <any> }
//! ```
//!
//! `new-data` flows both ways: from a client it is a write, from the relay it
//! is a push of the atom's current value. `msgId` is an advisory correlation
//! token and is never interpreted by the relay.
//!
//! Each message is one frame. Text frames carry JSON; binary frames carry the
//! same document as MessagePack with named fields.

mod codec;
mod message;

pub use codec::{Frame, WireFormat};
pub use message::{AtomId, AtomValue, Message, MsgId};
