//! Settings types with compiled defaults.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! overrides the keys it names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LugchatSettings {
    /// Listener and session settings.
    pub server: ServerSettings,
    /// Message store bounds.
    pub store: StoreSettings,
    /// Signing key files.
    pub keys: KeySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl LugchatSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Heartbeat ping interval.
    pub heartbeat_interval_ms: u64,
    /// Outbound frames buffered per session before drops.
    pub send_queue_capacity: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Message store bounds. `0` disables a bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Age limit in milliseconds.
    pub max_duration_ms: u64,
    /// Record count limit.
    pub max_records: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_duration_ms: 0,
            max_records: 1000,
        }
    }
}

/// Paths to the server's signing key pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeySettings {
    /// PKCS#8 PEM private key file.
    pub private_key_path: Option<String>,
    /// SPKI PEM public key file.
    pub public_key_path: Option<String>,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
