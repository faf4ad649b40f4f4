//! # lugchat-server
//!
//! Axum HTTP + `WebSocket` chat server.
//!
//! - `/ws`: one signed-envelope session per socket (login, subscribe, history, post)
//! - Fan-out of accepted posts to every subscribed session
//! - Heartbeat pings that drop silent clients
//! - `/health` with live counters
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::LugchatServer;
