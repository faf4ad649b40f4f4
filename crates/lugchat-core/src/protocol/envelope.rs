//! The signed wire wrapper.

use serde::{Deserialize, Serialize};

use super::message::{ClientMessage, ServerMessage};

/// Signed wrapper around one message.
///
/// `sig` is the hex Ed25519 signature over the canonical serialization of
/// `message`; `key_hash` is the signer's key fingerprint and carries no
/// trust on its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<M> {
    /// The signed message body.
    pub message: M,
    /// Hex-encoded detached signature.
    pub sig: String,
    /// Fingerprint of the signer's public key.
    pub key_hash: String,
    /// Protocol revision the sender speaks.
    pub protocol_version: u32,
}

/// Envelope sent by clients.
pub type ClientEnvelope = Envelope<ClientMessage>;

/// Envelope sent by the server.
pub type ServerEnvelope = Envelope<ServerMessage>;
