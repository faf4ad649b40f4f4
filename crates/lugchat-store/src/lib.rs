//! # lugchat-store
//!
//! Bounded, time-ordered, in-memory message log.
//!
//! Records are keyed by a Unix-millisecond timestamp and kept in ascending
//! key order. After every insert the store evicts by age, then by count,
//! always oldest first. Nothing is persisted; a restart starts empty.

#![deny(unsafe_code)]

pub mod config;
pub mod memory;

pub use config::StoreConfig;
pub use memory::{Clock, MessageStore};
