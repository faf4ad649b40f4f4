//! Eviction bounds.

use serde::{Deserialize, Serialize};

/// Eviction bounds for a [`crate::MessageStore`]. `0` disables a bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Records with a key older than `now - max_duration_ms` are evicted.
    pub max_duration_ms: u64,
    /// At most this many records are kept.
    pub max_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: 0,
            max_records: 1000,
        }
    }
}
