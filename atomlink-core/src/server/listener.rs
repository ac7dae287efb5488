//! Accept loop and per-connection tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::config::RelayConfig;
use crate::error::ServerError;
use crate::protocol::Frame;
use crate::registry::{AtomRegistry, Outbound, SessionHandle};
use crate::session::{Mailbox, Session};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Stops a running [`RelayServer`] and closes its connections.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// A bound relay, ready to [`run`](RelayServer::run).
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<AtomRegistry>,
    config: RelayConfig,
    shutdown: ShutdownHandle,
}

impl RelayServer {
    /// Bind the configured address with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the TCP listener cannot bind.
    pub async fn bind(config: RelayConfig) -> Result<Self, ServerError> {
        Self::bind_with_registry(config, Arc::new(AtomRegistry::new())).await
    }

    /// Bind the configured address, sharing an existing registry.
    pub async fn bind_with_registry(
        config: RelayConfig,
        registry: Arc<AtomRegistry>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.address(),
                source,
            })?;

        Ok(Self {
            listener,
            registry,
            config,
            shutdown: ShutdownHandle::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<AtomRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shut down.
    ///
    /// Each connection runs on its own task; a failing connection is logged
    /// and never affects the others.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(%addr, "relay listening");

        let mut shutdown = self.shutdown.subscribe();
        let stats_every = self.config.stats_interval();
        let mut stats = tokio::time::interval(stats_every.unwrap_or(Duration::from_secs(3600)));
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        stats.reset();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = Arc::clone(&self.registry);
                        let shutdown = self.shutdown.subscribe();
                        tokio::spawn(async move {
                            if let Err(error) = serve_connection(stream, peer, registry, shutdown).await {
                                debug!(%peer, %error, "connection ended with error");
                            }
                        });
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!(%addr, "relay shutting down");
                    break;
                }
                _ = stats.tick(), if stats_every.is_some() => {
                    let stats = self.registry.stats();
                    info!(
                        atoms = stats.atoms,
                        sessions = stats.sessions,
                        subscriptions = stats.subscriptions,
                        "registry stats"
                    );
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<AtomRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (sink, mut source) = ws.split();

    let (handle, outbound) = SessionHandle::channel();
    let mut session = Session::new(registry, handle);
    let id = session.id();
    info!(session = %id, %peer, "connection opened");

    let writer = tokio::spawn(write_loop(sink, outbound));

    let result = loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => session.handle_frame(Frame::Text(text)),
                Some(Ok(WsMessage::Binary(bytes))) => session.handle_frame(Frame::Binary(bytes)),
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(error)) => break Err(ServerError::from(error)),
            },
            _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
        }
    };

    // Dropping the session releases the last sender, which ends the writer.
    session.close();
    drop(session);
    if let Err(error) = writer.await {
        warn!(session = %id, %error, "writer task failed");
    }

    info!(session = %id, %peer, "connection closed");
    result
}

async fn write_loop(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let mut mailbox = Mailbox::new();

    while let Some(item) = outbound.recv().await {
        let Some(frame) = mailbox.prepare(item) else {
            continue;
        };
        if let Err(error) = sink.send(into_ws(frame)).await {
            debug!(%error, "write failed, stopping writer");
            break;
        }
    }

    let _ = sink.close().await;
}

fn into_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Binary(bytes) => WsMessage::Binary(bytes),
    }
}
