//! Message shapes and the identifiers they carry.

use std::borrow::Borrow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque key naming one shared atom.
///
/// Keys are flat: the relay compares them by equality only and gives `/`
/// no meaning. [`AtomId::composite`] exists so collaborators can build
/// per-channel keys the same way on every client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomId(String);

impl AtomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Join key segments with `/` into a single flat key.
    pub fn composite<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = String::new();
        for (i, segment) in segments.into_iter().enumerate() {
            if i > 0 {
                key.push('/');
            }
            key.push_str(segment.as_ref());
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AtomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for AtomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for AtomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Payload of a `new-data` message.
///
/// The relay stores and forwards this without looking inside. Equality is
/// structural, which is what the client adapter uses to suppress echoes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomValue(Value);

impl AtomValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Convert any serializable value into a payload.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self)
    }

    /// Deserialize the payload into a typed value.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<Value> for AtomValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Client-generated correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MsgId(String);

impl MsgId {
    /// A random run of decimal digits.
    pub fn random() -> Self {
        Self(rand::random::<u64>().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MsgId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Subscribe to an atom.
    ListenTo {
        #[serde(rename = "atomId")]
        atom_id: AtomId,
        #[serde(rename = "msgId", default, skip_serializing_if = "Option::is_none")]
        msg_id: Option<MsgId>,
    },

    /// Unsubscribe from an atom. Leaving an atom that was never joined is a no-op.
    Leave {
        #[serde(rename = "atomId")]
        atom_id: AtomId,
        #[serde(rename = "msgId", default, skip_serializing_if = "Option::is_none")]
        msg_id: Option<MsgId>,
    },

    /// A write (client to relay) or a push of the current value (relay to client).
    NewData {
        #[serde(rename = "atomId")]
        atom_id: AtomId,
        #[serde(rename = "msgId", default, skip_serializing_if = "Option::is_none")]
        msg_id: Option<MsgId>,
        #[serde(rename = "newData", default)]
        new_data: AtomValue,
    },
}

impl Message {
    /// The `type` tags this protocol understands.
    pub const KNOWN_TYPES: [&'static str; 3] = ["listen-to", "leave", "new-data"];

    pub fn listen_to(atom_id: AtomId) -> Self {
        Self::ListenTo { atom_id, msg_id: None }
    }

    pub fn leave(atom_id: AtomId) -> Self {
        Self::Leave {
            atom_id,
            msg_id: Some(MsgId::random()),
        }
    }

    pub fn new_data(atom_id: AtomId, new_data: AtomValue) -> Self {
        Self::NewData {
            atom_id,
            msg_id: Some(MsgId::random()),
            new_data,
        }
    }

    /// The atom this message is about.
    pub fn atom_id(&self) -> &AtomId {
        match self {
            Self::ListenTo { atom_id, .. }
            | Self::Leave { atom_id, .. }
            | Self::NewData { atom_id, .. } => atom_id,
        }
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ListenTo { .. } => "listen-to",
            Self::Leave { .. } => "leave",
            Self::NewData { .. } => "new-data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn composite_keys_join_with_slash() {
        let key = AtomId::composite(["usersInChannel", "Channel A"]);
        assert_eq!(key.as_str(), "usersInChannel/Channel A");

        let single = AtomId::composite(["solo"]);
        assert_eq!(single, AtomId::from("solo"));
    }

    #[test]
    fn new_data_uses_camel_case_fields() {
        let msg = Message::NewData {
            atom_id: "k".into(),
            msg_id: Some("123".into()),
            new_data: AtomValue::new(json!({"x": 1})),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "new-data", "atomId": "k", "msgId": "123", "newData": {"x": 1}})
        );
    }

    #[test]
    fn listen_to_omits_missing_msg_id() {
        let value = serde_json::to_value(Message::listen_to("k".into())).unwrap();
        assert_eq!(value, json!({"type": "listen-to", "atomId": "k"}));
    }

    #[test]
    fn random_msg_ids_are_digits() {
        let id = MsgId::random();
        assert!(!id.as_str().is_empty());
        assert!(id.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn atom_value_round_trips_typed_data() {
        let value = AtomValue::from_serialize(&vec!["a", "b"]).unwrap();
        let back: Vec<String> = value.deserialize_into().unwrap();
        assert_eq!(back, vec!["a".to_string(), "b".to_string()]);
    }
}
