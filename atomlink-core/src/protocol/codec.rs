//! Frame encoding.
//!
//! Decoding goes through an untyped document first so that a frame with an
//! unknown `type` can be told apart from one that is simply garbage. Both
//! are reported to the caller as a [`CodecError`] and never close the
//! connection.

use serde_json::Value;

use super::message::Message;
use crate::error::CodecError;

/// The encoding used for a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// UTF-8 JSON in a text frame.
    #[default]
    Json,
    /// MessagePack with named fields in a binary frame.
    MessagePack,
}

/// One complete protocol frame as it came off (or goes onto) the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn format(&self) -> WireFormat {
        match self {
            Self::Text(_) => WireFormat::Json,
            Self::Binary(_) => WireFormat::MessagePack,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Message {
    /// Decode a frame of either format.
    pub fn decode(frame: &Frame) -> Result<Self, CodecError> {
        match frame {
            Frame::Text(text) => Self::decode_text(text),
            Frame::Binary(bytes) => Self::decode_binary(bytes),
        }
    }

    /// Decode a JSON text frame.
    pub fn decode_text(text: &str) -> Result<Self, CodecError> {
        let doc: Value =
            serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Decode a MessagePack binary frame.
    pub fn decode_binary(bytes: &[u8]) -> Result<Self, CodecError> {
        let doc: Value =
            rmp_serde::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Encode this message as a frame of the given format.
    pub fn encode(&self, format: WireFormat) -> Result<Frame, CodecError> {
        match format {
            WireFormat::Json => serde_json::to_string(self)
                .map(Frame::Text)
                .map_err(|e| CodecError::Encode(e.to_string())),
            WireFormat::MessagePack => rmp_serde::to_vec_named(self)
                .map(Frame::Binary)
                .map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    fn from_document(doc: Value) -> Result<Self, CodecError> {
        let kind = match doc.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(CodecError::Malformed(format!("`type` is not a string: {other}")))
            }
            None if doc.is_object() => {
                return Err(CodecError::Malformed("missing `type` field".into()))
            }
            None => return Err(CodecError::Malformed("frame is not an object".into())),
        };

        if !Self::KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(CodecError::UnknownType(kind));
        }

        serde_json::from_value(doc).map_err(|e| CodecError::InvalidFields {
            kind,
            reason: e.to_string(),
        })
    }
}
