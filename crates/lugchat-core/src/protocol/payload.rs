//! Typed client message bodies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::MessageType;
use crate::errors::PayloadError;

/// `hello` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    /// Client's SPKI public key PEM.
    #[serde(alias = "pubKey")]
    pub public_key: String,
    /// Client-computed fingerprint; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_hash: Option<String>,
}

/// `subscribe` content. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscribePayload {
    /// Client's public key, repeated for older clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Newest message time the client already has, or 0.
    pub last_client_time: i64,
}

/// `history` content: an exclusive time window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPayload {
    /// Lower bound (exclusive), Unix ms.
    pub start: i64,
    /// Upper bound (exclusive), Unix ms.
    pub end: i64,
}

/// `post` content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    /// The chat line.
    pub post_content: String,
}

/// A client message body decoded according to its type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientPayload {
    /// Login.
    Hello(HelloPayload),
    /// Start receiving broadcasts.
    Subscribe(SubscribePayload),
    /// Stop receiving broadcasts.
    Unsubscribe,
    /// List logged-in nicks.
    Users,
    /// Query the history window.
    History(HistoryPayload),
    /// Publish.
    Post(PostPayload),
    /// Leave.
    Disconnect,
    /// A type this server does not know. Accepted without effect.
    Ignored(String),
}

impl ClientPayload {
    /// Decode `content` for a message of type `kind`.
    ///
    /// Types with no meaningful body ignore `content` entirely. Unrecognised
    /// client types decode to [`ClientPayload::Ignored`]; the server-only
    /// `response` and the `unknown` placeholder yield [`PayloadError::UnknownType`].
    pub fn decode(kind: &MessageType, content: &Value) -> Result<Self, PayloadError> {
        match kind {
            MessageType::Hello => decode_content(kind, content).map(Self::Hello),
            MessageType::Subscribe if content.is_null() => {
                Ok(Self::Subscribe(SubscribePayload::default()))
            }
            MessageType::Subscribe => decode_content(kind, content).map(Self::Subscribe),
            MessageType::Unsubscribe => Ok(Self::Unsubscribe),
            MessageType::Users => Ok(Self::Users),
            MessageType::History => decode_content(kind, content).map(Self::History),
            MessageType::Post => decode_content(kind, content).map(Self::Post),
            MessageType::Disconnect => Ok(Self::Disconnect),
            MessageType::Other(name) => Ok(Self::Ignored(name.clone())),
            MessageType::Response | MessageType::Unknown => {
                Err(PayloadError::UnknownType(kind.to_string()))
            }
        }
    }

    /// The message type this payload belongs to.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::Subscribe(_) => MessageType::Subscribe,
            Self::Unsubscribe => MessageType::Unsubscribe,
            Self::Users => MessageType::Users,
            Self::History(_) => MessageType::History,
            Self::Post(_) => MessageType::Post,
            Self::Disconnect => MessageType::Disconnect,
            Self::Ignored(name) => MessageType::Other(name.clone()),
        }
    }
}

fn decode_content<T: DeserializeOwned>(kind: &MessageType, content: &Value) -> Result<T, PayloadError> {
    T::deserialize(content).map_err(|e| PayloadError::InvalidContent {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}
