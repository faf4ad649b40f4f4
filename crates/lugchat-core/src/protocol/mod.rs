//! Wire protocol types.
//!
//! Every frame is one JSON [`Envelope`] whose `message` is either a
//! [`ClientMessage`] (client to server) or a [`ServerMessage`] (server
//! replies). Client `content` is decoded into a typed [`ClientPayload`]
//! according to the message's [`MessageType`].

pub mod envelope;
pub mod message;
pub mod payload;
pub mod user;

pub use envelope::{ClientEnvelope, Envelope, ServerEnvelope};
pub use message::{AccRej, ClientMessage, MessageType, RejectReason, ServerMessage};
pub use payload::{ClientPayload, HelloPayload, HistoryPayload, PostPayload, SubscribePayload};
pub use user::{ConnStatus, User, UserStatus};
