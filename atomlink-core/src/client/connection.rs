//! Shared connection to the relay.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::error::ClientError;
use crate::protocol::{AtomId, AtomValue, Frame, Message, WireFormat};
use crate::reactive::ListenerId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Handler = Arc<dyn Fn(&AtomValue) + Send + Sync>;

type HandlerMap = DashMap<AtomId, Vec<(ListenerId, Handler)>>;

/// Work for the connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outgoing {
    Message(Message),
    Close,
}

struct Inner {
    url: String,
    format: WireFormat,
    outbound: mpsc::UnboundedSender<Outgoing>,
    handlers: Arc<HandlerMap>,
    closed: Arc<AtomicBool>,
}

/// One WebSocket connection to a relay.
///
/// Cheap to clone; every clone shares the same socket and handler table.
/// The socket closes once every clone is dropped or [`close`] is called.
///
/// [`close`]: RemoteConnection::close
#[derive(Clone)]
pub struct RemoteConnection {
    inner: Arc<Inner>,
}

impl RemoteConnection {
    /// Connect using JSON text frames.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        Self::connect_with_format(url, WireFormat::Json).await
    }

    /// Connect, encoding outbound messages in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the handshake fails.
    pub async fn connect_with_format(url: &str, format: WireFormat) -> Result<Self, ClientError> {
        let (ws, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|source| ClientError::Connect {
                    url: url.to_string(),
                    source,
                })?;
        let (sink, stream) = ws.split();

        let (outbound, rx) = mpsc::unbounded_channel();
        let handlers = Arc::new(HandlerMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(sink, rx, format, Arc::clone(&closed)));
        tokio::spawn(read_loop(stream, Arc::clone(&handlers), Arc::clone(&closed)));

        info!(url, ?format, "connected to relay");
        Ok(Self::from_parts(url, format, outbound, handlers, closed))
    }

    fn from_parts(
        url: &str,
        format: WireFormat,
        outbound: mpsc::UnboundedSender<Outgoing>,
        handlers: Arc<HandlerMap>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.to_string(),
                format,
                outbound,
                handlers,
                closed,
            }),
        }
    }

    /// A connection with no socket behind it; outbound traffic lands in the
    /// returned receiver.
    #[cfg(test)]
    pub(crate) fn loopback() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Self::from_parts(
            "loopback",
            WireFormat::Json,
            outbound,
            Arc::new(HandlerMap::new()),
            Arc::new(AtomicBool::new(false)),
        );
        (conn, rx)
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn format(&self) -> WireFormat {
        self.inner.format
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.outbound.is_closed()
    }

    /// Queue a message for the relay.
    pub fn send(&self, message: Message) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        trace!(kind = message.kind(), atom = %message.atom_id(), "queue outbound");
        self.inner
            .outbound
            .send(Outgoing::Message(message))
            .map_err(|_| ClientError::Closed)
    }

    pub fn listen_to(&self, atom: &AtomId) -> Result<(), ClientError> {
        self.send(Message::listen_to(atom.clone()))
    }

    pub fn leave(&self, atom: &AtomId) -> Result<(), ClientError> {
        self.send(Message::leave(atom.clone()))
    }

    pub fn publish(&self, atom: &AtomId, value: AtomValue) -> Result<(), ClientError> {
        self.send(Message::new_data(atom.clone(), value))
    }

    /// Run `handler` for every `new-data` the relay pushes for `atom`.
    pub fn on_data<F>(&self, atom: &AtomId, handler: F) -> ListenerId
    where
        F: Fn(&AtomValue) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.inner
            .handlers
            .entry(atom.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler installed with [`on_data`](Self::on_data).
    pub fn remove_handler(&self, atom: &AtomId, id: ListenerId) -> bool {
        let removed = match self.inner.handlers.get_mut(atom) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(existing, _)| *existing != id);
                entry.len() != before
            }
            None => false,
        };
        self.inner
            .handlers
            .remove_if(atom, |_, handlers| handlers.is_empty());
        removed
    }

    /// Install `handler` for `atom` and subscribe to it.
    ///
    /// Bindings sharing this connection share one relay subscription per
    /// atom; [`release`](Self::release) leaves only when the last handler
    /// is gone. The handler table stays locked for `atom` while `listen-to`
    /// is queued, so a concurrent release cannot slip a `leave` behind it.
    pub fn join<F>(&self, atom: &AtomId, handler: F) -> Result<ListenerId, ClientError>
    where
        F: Fn(&AtomValue) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        let mut handlers = self.inner.handlers.entry(atom.clone()).or_default();
        let sent = self.listen_to(atom);
        if sent.is_ok() {
            handlers.push((id, Arc::new(handler)));
        }
        drop(handlers);

        match sent {
            Ok(()) => Ok(id),
            Err(error) => {
                self.inner
                    .handlers
                    .remove_if(atom, |_, handlers| handlers.is_empty());
                Err(error)
            }
        }
    }

    /// Remove a handler installed with [`join`](Self::join), leaving `atom`
    /// once no handler for it remains.
    ///
    /// Returns whether `leave` was sent.
    pub fn release(&self, atom: &AtomId, id: ListenerId) -> Result<bool, ClientError> {
        match self.inner.handlers.entry(atom.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().retain(|(existing, _)| *existing != id);
                if !entry.get().is_empty() {
                    trace!(%atom, remaining = entry.get().len(), "atom still bound, leave skipped");
                    return Ok(false);
                }
                let sent = self.leave(atom);
                entry.remove();
                sent.map(|()| true)
            }
            Entry::Vacant(_) => self.leave(atom).map(|()| true),
        }
    }

    pub fn handler_count(&self, atom: &AtomId) -> usize {
        self.inner.handlers.get(atom).map_or(0, |entry| entry.len())
    }

    /// Send a close frame once queued messages are flushed.
    pub fn close(&self) {
        let _ = self.inner.outbound.send(Outgoing::Close);
    }

    #[cfg(test)]
    pub(crate) fn deliver(&self, atom: &AtomId, value: &AtomValue) {
        dispatch(&self.inner.handlers, atom, value);
    }
}

impl fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("url", &self.inner.url)
            .field("format", &self.inner.format)
            .field("atoms", &self.inner.handlers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn dispatch(handlers: &HandlerMap, atom: &AtomId, value: &AtomValue) {
    // Snapshot so handlers run without holding the shard lock.
    let snapshot: Vec<Handler> = match handlers.get(atom) {
        Some(entry) => entry.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
        None => {
            trace!(%atom, "push for atom with no handler");
            return;
        }
    };

    for handler in snapshot {
        handler(value);
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, handlers: Arc<HandlerMap>, closed: Arc<AtomicBool>) {
    while let Some(incoming) = stream.next().await {
        let frame = match incoming {
            Ok(WsMessage::Text(text)) => Frame::Text(text),
            Ok(WsMessage::Binary(bytes)) => Frame::Binary(bytes),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(error) => {
                debug!(%error, "relay connection failed");
                break;
            }
        };

        match Message::decode(&frame) {
            Ok(Message::NewData {
                atom_id, new_data, ..
            }) => dispatch(&handlers, &atom_id, &new_data),
            Ok(other) => debug!(kind = other.kind(), "ignoring non-data message from relay"),
            Err(error) => warn!(%error, "discarding frame from relay"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    debug!("relay connection closed");
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    format: WireFormat,
    closed: Arc<AtomicBool>,
) {
    while let Some(item) = outbound.recv().await {
        let message = match item {
            Outgoing::Message(message) => message,
            Outgoing::Close => break,
        };

        let frame = match message.encode(format) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "failed to encode outbound message");
                continue;
            }
        };
        let ws = match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
        };
        if let Err(error) = sink.send(ws).await {
            debug!(%error, "write to relay failed");
            break;
        }
    }

    closed.store(true, Ordering::SeqCst);
    let _ = sink.close().await;
}
