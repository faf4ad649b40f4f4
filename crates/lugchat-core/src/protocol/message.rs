//! Client and server message bodies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::now_ms;

/// The `type` tag of a message.
///
/// Unrecognised tags deserialize to [`MessageType::Other`] so a reply can
/// still echo them back in `responseToType`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Login with a public key.
    Hello,
    /// Start receiving broadcasts.
    Subscribe,
    /// Stop receiving broadcasts.
    Unsubscribe,
    /// List logged-in nicks.
    Users,
    /// Request stored messages in a time window.
    History,
    /// Publish a chat line.
    Post,
    /// Leave the server.
    Disconnect,
    /// Server reply.
    Response,
    /// Placeholder when the original type could not be read.
    Unknown,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl MessageType {
    /// Wire name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Users => "users",
            Self::History => "history",
            Self::Post => "post",
            Self::Disconnect => "disconnect",
            Self::Response => "response",
            Self::Unknown => "unknown",
            Self::Other(tag) => tag,
        }
    }

    /// Whether a session must be logged in before sending this type.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Subscribe | Self::Unsubscribe | Self::Users | Self::History | Self::Post
        )
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "hello" => Self::Hello,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "users" => Self::Users,
            "history" => Self::History,
            "post" => Self::Post,
            "disconnect" => Self::Disconnect,
            "response" => Self::Response,
            "unknown" => Self::Unknown,
            _ => Self::Other(tag),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent by a client.
///
/// Field order here is irrelevant to signing; the codec sorts keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Client-declared timestamp (Unix ms). Used as the store key.
    pub time: i64,
    /// Sender's display name.
    pub nick: String,
    /// Type-specific body, see [`crate::protocol::ClientPayload`].
    pub content: Value,
}

impl ClientMessage {
    /// Build a message stamped with the current time.
    pub fn now(kind: MessageType, nick: impl Into<String>, content: Value) -> Self {
        Self {
            kind,
            time: now_ms(),
            nick: nick.into(),
            content,
        }
    }
}

/// Accept/reject verdict on a server reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccRej {
    /// The message was handled.
    Accept,
    /// The message was refused; see `reason`.
    Reject,
}

/// Why a message was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    /// No reason given.
    None,
    /// The frame or its content was malformed, or the type is not supported.
    Format,
    /// Signature verification failed.
    Signature,
    /// The session is not in a state that allows the action.
    Access,
    /// Internal server fault.
    Exception,
}

/// Reply sent by the server, correlated to one client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Always [`MessageType::Response`].
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Type of the message being answered.
    pub response_to_type: MessageType,
    /// Signature of the message being answered, or empty if unreadable.
    pub orig_sig: String,
    /// Verdict.
    pub response: AccRej,
    /// Present only on reject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// Server time (Unix ms).
    pub time: i64,
    /// Type-specific reply body.
    pub content: Value,
}

impl ServerMessage {
    /// Accept reply carrying `content`.
    pub fn accept(response_to_type: MessageType, orig_sig: impl Into<String>, content: Value) -> Self {
        Self {
            kind: MessageType::Response,
            response_to_type,
            orig_sig: orig_sig.into(),
            response: AccRej::Accept,
            reason: None,
            time: now_ms(),
            content,
        }
    }

    /// Reject reply with an empty object body.
    pub fn reject(
        response_to_type: MessageType,
        orig_sig: impl Into<String>,
        reason: RejectReason,
    ) -> Self {
        Self {
            kind: MessageType::Response,
            response_to_type,
            orig_sig: orig_sig.into(),
            response: AccRej::Reject,
            reason: Some(reason),
            time: now_ms(),
            content: Value::Object(serde_json::Map::new()),
        }
    }

    /// Reject reply for a frame that could not be parsed at all.
    pub fn unparseable() -> Self {
        Self {
            content: Value::Null,
            ..Self::reject(MessageType::Unknown, "", RejectReason::Format)
        }
    }

    /// Whether this reply accepts the message.
    pub fn is_accept(&self) -> bool {
        self.response == AccRej::Accept
    }
}
