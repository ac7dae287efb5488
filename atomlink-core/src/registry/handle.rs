//! Session handles and the pushes delivered through them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::{AtomId, AtomValue, WireFormat};

/// Process-unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The value of an atom at a given write.
///
/// `version` increases by one per write to the same key, which lets a
/// session's writer discard a push that was overtaken by a newer one.
/// `epoch` names the subscription the push is addressed to; it is zero until
/// the push is addressed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Push {
    pub atom: AtomId,
    pub value: AtomValue,
    pub version: u64,
    pub epoch: u64,
}

impl Push {
    pub fn addressed_to(&self, epoch: u64) -> Self {
        Self {
            epoch,
            ..self.clone()
        }
    }
}

/// Work queued for a session's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send the current value of an atom.
    Push(Push),
    /// The session left an atom. Pushes addressed to that subscription, or
    /// any earlier one, are dropped.
    Forget { atom: AtomId, epoch: u64 },
    /// Encode subsequent frames in this format.
    Format(WireFormat),
}

/// Fan-out target for one session.
///
/// The registry keeps clones of this in every record the session subscribes
/// to. Sending never blocks: pushes go onto an unbounded queue that the
/// session's writer task drains onto the socket.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn new(id: SessionId, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, outbound }
    }

    /// Create a handle together with the queue it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(SessionId::new(), tx), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a push. Returns `false` if the session's writer is gone.
    pub fn push(&self, push: Push) -> bool {
        self.send(Outbound::Push(push))
    }

    pub fn send(&self, outbound: Outbound) -> bool {
        self.outbound.send(outbound).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// One session's subscription to one atom.
///
/// Every subscribe opens a new epoch, so pushes snapshotted before a `leave`
/// can be told apart from pushes for a later re-subscribe.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub handle: SessionHandle,
    pub epoch: u64,
}

/// The result of a write: the stored value and every session to push it to.
#[derive(Debug, Clone)]
pub struct FanOut {
    pub push: Push,
    pub recipients: SmallVec<[Subscriber; 8]>,
}

impl FanOut {
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Queue the push on every recipient. Returns how many accepted it.
    pub fn deliver(self) -> usize {
        let Self { push, recipients } = self;
        let mut delivered = 0;
        for Subscriber { handle, epoch } in &recipients {
            if handle.push(push.addressed_to(*epoch)) {
                delivered += 1;
            } else {
                warn!(session = %handle.id(), atom = %push.atom, "push to closed session dropped");
            }
        }
        delivered
    }
}
