//! Error types shared across the crate.
//!
//! Each concern gets its own enum. None of these is fatal to the relay
//! process: codec errors discard a single frame, server errors end a single
//! connection, and client errors are returned to the caller.

use thiserror::Error;

/// Failure to turn a frame into a [`Message`](crate::protocol::Message) or back.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not a well-formed document of the expected encoding.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame parsed but its `type` tag is not one we know.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The frame has a known `type` but is missing or mistyping a field.
    #[error("invalid {kind} message: {reason}")]
    InvalidFields { kind: String, reason: String },

    /// Serializing an outbound message failed.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Errors raised while binding or running the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The WebSocket handshake or a later read on the connection failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the client sync adapter.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Opening the connection to the relay failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The connection has been closed; nothing more can be sent.
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A local value could not be converted to a wire payload.
    #[error("failed to serialize value for atom {atom}: {source}")]
    Serialize {
        atom: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while loading relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// An environment override held a value of the wrong shape.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}
