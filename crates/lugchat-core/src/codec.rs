//! Envelope signing and verification.
//!
//! # Canonical form
//!
//! A message is signed over its canonical JSON: compact (no insignificant
//! whitespace), object keys sorted by byte order at every depth, arrays in
//! order, scalars rendered exactly as `serde_json` renders them. Any client
//! implementation must produce the same bytes or its signatures will not
//! verify.
//!
//! # Keys
//!
//! Ed25519. Private keys are PKCS#8 PEM, public keys are SPKI PEM. The
//! signature is hex-encoded in `Envelope::sig`. `keyHash` is the hex SHA-256
//! of the public key PEM text as sent.

use std::fmt;

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::{CodecError, Result};
use crate::protocol::Envelope;

/// Protocol revision stamped on every outgoing envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Serialize `message` to its canonical byte form.
pub fn canonical_bytes<M: Serialize>(message: &M) -> Result<Vec<u8>> {
    let value = serde_json::to_value(message)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out.into_bytes())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Hex SHA-256 fingerprint of a public key's PEM text.
pub fn fingerprint(public_key: &str) -> String {
    hex::encode(Sha256::digest(public_key.as_bytes()))
}

/// Parse an SPKI PEM public key.
pub fn parse_public_key(pem: &str) -> Result<VerifyingKey> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| CodecError::InvalidPublicKey(e.to_string()))
}

/// Sign `message` and wrap it in an envelope.
pub fn wrap<M: Serialize>(
    message: M,
    signing_key: &SigningKey,
    signer_public_key: &str,
) -> Result<Envelope<M>> {
    let bytes = canonical_bytes(&message)?;
    let signature = signing_key.sign(&bytes);
    Ok(Envelope {
        message,
        sig: hex::encode(signature.to_bytes()),
        key_hash: fingerprint(signer_public_key),
        protocol_version: PROTOCOL_VERSION,
    })
}

/// Check an envelope's signature against a PEM public key.
///
/// Returns `false` for any malformed input: bad PEM, bad hex, wrong
/// signature length, or a signature that does not match.
pub fn verify<M: Serialize>(envelope: &Envelope<M>, public_key: &str) -> bool {
    match parse_public_key(public_key) {
        Ok(key) => verify_with_key(envelope, &key),
        Err(_) => false,
    }
}

/// [`verify`] against an already-parsed key.
pub fn verify_with_key<M: Serialize>(envelope: &Envelope<M>, key: &VerifyingKey) -> bool {
    let Ok(bytes) = canonical_bytes(&envelope.message) else {
        return false;
    };
    let Ok(raw) = hex::decode(&envelope.sig) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&raw) else {
        return false;
    };
    key.verify_strict(&bytes, &signature).is_ok()
}

/// An Ed25519 key pair with its PEM public key, used to sign envelopes.
///
/// The server holds one for the process lifetime; clients (and tests) hold
/// their own.
pub struct Identity {
    signing_key: SigningKey,
    public_key_pem: String,
    key_hash: String,
}

impl Identity {
    /// Load from PEM strings, checking the halves belong together.
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(private_pem)
            .map_err(|e| CodecError::InvalidPrivateKey(e.to_string()))?;
        let declared = parse_public_key(public_pem)?;
        if signing_key.verifying_key() != declared {
            return Err(CodecError::KeyMismatch);
        }
        Ok(Self {
            key_hash: fingerprint(public_pem),
            public_key_pem: public_pem.to_owned(),
            signing_key,
        })
    }

    /// Generate a fresh random key pair.
    pub fn generate() -> Result<Self> {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let public_key_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Self {
            key_hash: fingerprint(&public_key_pem),
            public_key_pem,
            signing_key,
        })
    }

    /// PKCS#8 PEM of the private key, for writing key files.
    pub fn private_key_pem(&self) -> Result<String> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(pem.as_str().to_owned())
    }

    /// SPKI PEM of the public key.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Fingerprint of [`Self::public_key_pem`].
    pub fn key_hash(&self) -> &str {
        &self.key_hash
    }

    /// Parsed public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign `message` with this identity.
    pub fn sign<M: Serialize>(&self, message: M) -> Result<Envelope<M>> {
        wrap(message, &self.signing_key, &self.public_key_pem)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("key_hash", &self.key_hash)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, MessageType, RejectReason, ServerMessage};
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn post(text: &str) -> ClientMessage {
        ClientMessage {
            kind: MessageType::Post,
            time: 1_700_000_000_000,
            nick: "ada".into(),
            content: json!({ "postContent": text }),
        }
    }

    #[test]
    fn canonical_sorts_keys_at_every_depth() {
        let v = json!({"b": 1, "a": {"z": [3, {"y": true, "x": null}], "c": "s"}});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":"s","z":[3,{"x":null,"y":true}]},"b":1}"#
        );
    }

    #[test]
    fn canonical_ignores_struct_field_order() {
        let msg = post("hi");
        let bytes = canonical_bytes(&msg).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"content":{"postContent":"hi"},"nick":"ada","time":1700000000000,"type":"post"}"#
        );
    }

    #[test]
    fn canonical_escapes_strings() {
        let bytes = canonical_bytes(&json!({"k": "a\"b\n"})).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"k":"a\"b\n"}"#);
    }

    #[test]
    fn wrap_then_verify() {
        let id = Identity::generate().unwrap();
        let env = id.sign(post("hello")).unwrap();
        assert_eq!(env.protocol_version, PROTOCOL_VERSION);
        assert_eq!(env.key_hash, fingerprint(id.public_key_pem()));
        assert_eq!(env.sig.len(), 128);
        assert!(verify(&env, id.public_key_pem()));
    }

    #[test]
    fn verify_survives_json_round_trip() {
        let id = Identity::generate().unwrap();
        let env = id.sign(post("over the wire")).unwrap();
        let wire = serde_json::to_string(&env).unwrap();
        let back: Envelope<ClientMessage> = serde_json::from_str(&wire).unwrap();
        assert!(verify(&back, id.public_key_pem()));
    }

    #[test]
    fn verify_server_message() {
        let id = Identity::generate().unwrap();
        let env = id
            .sign(ServerMessage::reject(MessageType::Post, "ff", RejectReason::Access))
            .unwrap();
        assert!(verify(&env, id.public_key_pem()));
    }

    #[test]
    fn wrong_key_fails() {
        let signer = Identity::generate().unwrap();
        let other = Identity::generate().unwrap();
        let env = signer.sign(post("x")).unwrap();
        assert!(!verify(&env, other.public_key_pem()));
    }

    #[test]
    fn malformed_inputs_return_false() {
        let id = Identity::generate().unwrap();
        let mut env = id.sign(post("x")).unwrap();
        assert!(!verify(&env, "not a pem"));

        env.sig = "zz".into();
        assert!(!verify(&env, id.public_key_pem()));

        env.sig = "abcd".into();
        assert!(!verify(&env, id.public_key_pem()));

        env.sig = String::new();
        assert!(!verify(&env, id.public_key_pem()));
    }

    #[test]
    fn identity_pem_round_trip() {
        let id = Identity::generate().unwrap();
        let private = id.private_key_pem().unwrap();
        let loaded = Identity::from_pem(&private, id.public_key_pem()).unwrap();
        assert_eq!(loaded.key_hash(), id.key_hash());
        assert_eq!(loaded.verifying_key(), id.verifying_key());
    }

    #[test]
    fn identity_rejects_mismatched_halves() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let err = Identity::from_pem(&a.private_key_pem().unwrap(), b.public_key_pem()).unwrap_err();
        assert_matches!(err, CodecError::KeyMismatch);
    }

    #[test]
    fn identity_rejects_garbage() {
        let a = Identity::generate().unwrap();
        assert_matches!(
            Identity::from_pem("nope", a.public_key_pem()),
            Err(CodecError::InvalidPrivateKey(_))
        );
        assert_matches!(
            Identity::from_pem(&a.private_key_pem().unwrap(), "nope"),
            Err(CodecError::InvalidPublicKey(_))
        );
    }

    #[test]
    fn debug_hides_key_material() {
        let id = Identity::generate().unwrap();
        let dbg = format!("{id:?}");
        assert!(dbg.contains(id.key_hash()));
        assert!(!dbg.contains("PRIVATE"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn any_post_round_trips(text in ".*", time in any::<i64>(), nick in "[a-z]{1,12}") {
            let id = Identity::generate().unwrap();
            let msg = ClientMessage { time, nick, ..post(&text) };
            let env = id.sign(msg).unwrap();
            prop_assert!(verify(&env, id.public_key_pem()));
        }

        #[test]
        fn tampering_breaks_signature(text in ".{0,40}", extra in "[a-z]{1,8}", delta in 1i64..1_000_000) {
            let id = Identity::generate().unwrap();
            let env = id.sign(post(&text)).unwrap();

            let mut changed_time = env.clone();
            changed_time.message.time += delta;
            prop_assert!(!verify(&changed_time, id.public_key_pem()));

            let mut changed_nick = env.clone();
            changed_nick.message.nick.push_str(&extra);
            prop_assert!(!verify(&changed_nick, id.public_key_pem()));

            let mut changed_body = env.clone();
            changed_body.message.content = json!({ "postContent": format!("{text}{extra}") });
            prop_assert!(!verify(&changed_body, id.public_key_pem()));

            let mut changed_type = env;
            changed_type.message.kind = MessageType::History;
            prop_assert!(!verify(&changed_type, id.public_key_pem()));
        }
    }
}
