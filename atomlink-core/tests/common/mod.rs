//! Shared helpers for relay integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atomlink_core::registry::AtomRegistry;
use atomlink_core::server::{RelayConfig, RelayServer, ShutdownHandle};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type RawClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(200);

pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: Arc<AtomRegistry>,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<Result<(), atomlink_core::ServerError>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let server = RelayServer::bind(RelayConfig::local()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Self {
            addr,
            registry,
            shutdown,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn raw_client(&self) -> RawClient {
        let (ws, _) = tokio_tungstenite::connect_async(self.url()).await.unwrap();
        ws
    }
}

pub async fn send_json(ws: &mut RawClient, value: Value) {
    ws.send(WsMessage::Text(value.to_string())).await.unwrap();
}

pub async fn send_raw(ws: &mut RawClient, text: &str) {
    ws.send(WsMessage::Text(text.to_string())).await.unwrap();
}

pub async fn send_binary(ws: &mut RawClient, bytes: &[u8]) {
    ws.send(WsMessage::Binary(bytes.to_vec())).await.unwrap();
}

pub async fn listen(ws: &mut RawClient, atom: &str) {
    send_json(ws, json!({"type": "listen-to", "atomId": atom})).await;
}

pub async fn leave(ws: &mut RawClient, atom: &str) {
    send_json(ws, json!({"type": "leave", "atomId": atom, "msgId": "1"})).await;
}

pub async fn write(ws: &mut RawClient, atom: &str, data: Value) {
    send_json(
        ws,
        json!({"type": "new-data", "atomId": atom, "msgId": "1", "newData": data}),
    )
    .await;
}

/// Next `new-data` push as `(atomId, newData)`, or `None` on timeout/close.
pub async fn next_data_within(ws: &mut RawClient, wait: Duration) -> Option<(String, Value)> {
    let result = tokio::time::timeout(wait, async {
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                let doc: Value = serde_json::from_str(&text).ok()?;
                if doc["type"] == "new-data" {
                    return Some((doc["atomId"].as_str()?.to_string(), doc["newData"].clone()));
                }
            }
        }
        None
    })
    .await;
    result.ok().flatten()
}

pub async fn next_data(ws: &mut RawClient) -> (String, Value) {
    next_data_within(ws, WAIT)
        .await
        .expect("expected a new-data push")
}

pub async fn expect_silence(ws: &mut RawClient) {
    if let Some(push) = next_data_within(ws, QUIET).await {
        panic!("unexpected push: {push:?}");
    }
}

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future`, failing the test if it takes longer than `WAIT`.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}
