//! Codec and payload error types.

use thiserror::Error;

/// Errors raised while loading keys or signing messages.
///
/// Verification never produces one of these: [`crate::codec::verify`]
/// collapses every failure to `false`.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The PKCS#8 private key PEM could not be parsed.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    /// The SPKI public key PEM could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    /// The private key does not derive the supplied public key.
    #[error("private key does not match the supplied public key")]
    KeyMismatch,
    /// A message could not be serialized to JSON.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A key could not be encoded to PEM.
    #[error("failed to encode key: {0}")]
    Encode(String),
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while decoding a client message's `content`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The `type` tag is not one a client may send.
    #[error("unsupported message type: {0}")]
    UnknownType(String),
    /// The `content` does not match the shape required by the `type`.
    #[error("invalid {kind} content: {reason}")]
    InvalidContent {
        /// Message type whose content failed to decode.
        kind: String,
        /// Decoder error text.
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mismatch_display() {
        assert_eq!(
            CodecError::KeyMismatch.to_string(),
            "private key does not match the supplied public key"
        );
    }

    #[test]
    fn serialize_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: CodecError = json_err.into();
        assert!(matches!(err, CodecError::Serialize(_)));
    }

    #[test]
    fn invalid_content_display() {
        let err = PayloadError::InvalidContent {
            kind: "post".into(),
            reason: "missing field `postContent`".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid post content: missing field `postContent`"
        );
    }

    #[test]
    fn unknown_type_display() {
        let err = PayloadError::UnknownType("reply".into());
        assert!(err.to_string().contains("reply"));
    }
}
