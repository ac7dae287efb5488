//! Connection Session
//!
//! A [`Session`] is the relay's protocol handler for one live connection.
//! It decodes inbound frames, keeps the set of atoms this connection is
//! subscribed to, and turns each message into registry operations:
//!
//! - `listen-to`: subscribe, then send the current value if there is one
//! - `leave`: unsubscribe (a no-op for keys never joined)
//! - `new-data`: write to the registry and fan out to every subscriber,
//!   the sender included
//!
//! A session is `Connected` from creation until [`Session::close`], after
//! which it is `Closed` for good. Closing removes the session from every
//! record it subscribed to; dropping a session closes it, so cleanup runs
//! however the connection ends.
//!
//! Outbound traffic never touches the socket here. Pushes are queued on the
//! session's [`SessionHandle`] and turned into frames by a [`Mailbox`] in
//! the connection's writer task.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::protocol::{AtomId, AtomValue, Frame, Message, WireFormat};
use crate::registry::{AtomRegistry, Outbound, Push, SessionHandle, SessionId};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Closed,
}

/// Server-side protocol state for one connection.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    registry: Arc<AtomRegistry>,
    subscriptions: HashMap<AtomId, u64>,
    format: WireFormat,
    state: SessionState,
}

impl Session {
    pub fn new(registry: Arc<AtomRegistry>, handle: SessionHandle) -> Self {
        Self {
            handle,
            registry,
            subscriptions: HashMap::new(),
            format: WireFormat::default(),
            state: SessionState::Connected,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Keys this session is subscribed to and the epoch of each subscription.
    pub fn subscriptions(&self) -> &HashMap<AtomId, u64> {
        &self.subscriptions
    }

    pub fn is_subscribed(&self, key: &AtomId) -> bool {
        self.subscriptions.contains_key(key)
    }

    /// Handle one inbound frame.
    ///
    /// Frames that fail to decode are logged and dropped without touching
    /// session state; the connection stays open.
    pub fn handle_frame(&mut self, frame: Frame) {
        if self.state == SessionState::Closed {
            trace!(session = %self.id(), "frame after close ignored");
            return;
        }

        match Message::decode(&frame) {
            Ok(message) => {
                self.follow_format(frame.format());
                self.handle_message(message);
            }
            Err(error) => {
                warn!(session = %self.id(), bytes = frame.len(), %error, "discarding frame");
            }
        }
    }

    /// Apply one decoded message.
    pub fn handle_message(&mut self, message: Message) {
        if self.state == SessionState::Closed {
            return;
        }

        debug!(session = %self.id(), kind = message.kind(), atom = %message.atom_id(), "message");
        match message {
            Message::ListenTo { atom_id, .. } => self.listen_to(atom_id),
            Message::Leave { atom_id, .. } => self.leave(&atom_id),
            Message::NewData {
                atom_id, new_data, ..
            } => self.new_data(&atom_id, new_data),
        }
    }

    fn listen_to(&mut self, key: AtomId) {
        let subscription = self.registry.subscribe(&self.handle, &key);
        self.subscriptions.insert(key, subscription.epoch);

        if let Some(push) = subscription.catch_up {
            self.send(Outbound::Push(push));
        }
    }

    fn leave(&mut self, key: &AtomId) {
        let Some(epoch) = self.subscriptions.remove(key) else {
            trace!(session = %self.id(), atom = %key, "leave for atom not joined");
            return;
        };
        self.registry.unsubscribe(self.id(), key);
        self.send(Outbound::Forget {
            atom: key.clone(),
            epoch,
        });
    }

    fn new_data(&mut self, key: &AtomId, value: AtomValue) {
        let fan_out = self.registry.write(key, value);
        let recipients = fan_out.len();
        let delivered = fan_out.deliver();
        trace!(session = %self.id(), atom = %key, recipients, delivered, "fan-out");
    }

    /// Reply in whatever format the peer last spoke.
    fn follow_format(&mut self, format: WireFormat) {
        if format != self.format {
            self.format = format;
            self.send(Outbound::Format(format));
        }
    }

    fn send(&self, outbound: Outbound) {
        if !self.handle.send(outbound) {
            debug!(session = %self.id(), "writer gone, outbound dropped");
        }
    }

    /// Unregister from every atom and stop handling frames. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.subscriptions.clear();
        let removed = self.registry.drop_session(self.id());
        debug!(session = %self.id(), removed, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writer-side state that turns queued [`Outbound`] items into frames.
///
/// Pushes are queued after the registry lock is released, so two writes to
/// the same key can reach the queue out of order. The mailbox remembers the
/// last version sent per key and drops anything not newer, which keeps every
/// subscriber converging on the latest write.
///
/// A push snapshotted before the session left an atom can also arrive after
/// the leave. The mailbox remembers the epoch of the last subscription left
/// per key and drops pushes addressed to it or to anything older.
#[derive(Debug, Default)]
pub struct Mailbox {
    format: WireFormat,
    delivered: HashMap<AtomId, Delivery>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Delivery {
    left_epoch: Option<u64>,
    last_version: Option<u64>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one outbound item, returning the frame to send if any.
    pub fn prepare(&mut self, outbound: Outbound) -> Option<Frame> {
        match outbound {
            Outbound::Push(push) => self.frame_for(push),
            Outbound::Forget { atom, epoch } => {
                let delivery = self.delivered.entry(atom).or_default();
                delivery.left_epoch = delivery.left_epoch.max(Some(epoch));
                delivery.last_version = None;
                None
            }
            Outbound::Format(format) => {
                self.format = format;
                None
            }
        }
    }

    fn frame_for(&mut self, push: Push) -> Option<Frame> {
        let delivery = self.delivered.entry(push.atom.clone()).or_default();
        if delivery.left_epoch.is_some_and(|left| push.epoch <= left) {
            trace!(atom = %push.atom, epoch = push.epoch, "push after leave skipped");
            return None;
        }
        if let Some(last) = delivery.last_version {
            if push.version <= last {
                trace!(atom = %push.atom, version = push.version, last, "stale push skipped");
                return None;
            }
        }
        delivery.last_version = Some(push.version);

        let message = Message::new_data(push.atom, push.value);
        match message.encode(self.format) {
            Ok(frame) => Some(frame),
            Err(error) => {
                warn!(%error, "failed to encode push");
                None
            }
        }
    }
}
