//! # lugchat-core
//!
//! Shared protocol layer for the lugchat server and its clients.
//!
//! - [`protocol`]: wire types (envelope, client/server messages, typed payloads, user state)
//! - [`codec`]: canonical serialization, Ed25519 signing and verification, key fingerprints
//! - [`errors`]: codec and payload error types
//! - [`ids`]: session identifiers
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod time;

pub use codec::{Identity, PROTOCOL_VERSION};
pub use errors::{CodecError, PayloadError, Result};
