//! WebSocket sessions: per-connection state machine, heartbeat, registry, and fan-out.

pub mod broadcaster;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
