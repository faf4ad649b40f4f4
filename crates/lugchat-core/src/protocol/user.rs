//! Per-connection user state.

use serde::{Deserialize, Serialize};

/// Protocol state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnStatus {
    /// Transport is open, no `hello` yet.
    Connected,
    /// `hello` accepted.
    LoggedIn,
    /// Receiving broadcasts.
    Subscribed,
    /// Logged in, broadcasts paused.
    Unsubscribed,
    /// Torn down. Terminal.
    Disconnected,
}

impl ConnStatus {
    /// Whether the session has completed `hello` and is still live.
    pub fn is_logged_in(self) -> bool {
        matches!(self, Self::LoggedIn | Self::Subscribed | Self::Unsubscribed)
    }
}

/// Presence as seen by other users.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Connected.
    Online,
    /// Gone.
    Offline,
}

/// State of the user behind one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Best-effort originating address.
    pub ip: String,
    /// Display name, set by `hello`.
    pub nick: String,
    /// SPKI public key PEM, set by `hello`.
    pub public_key: Option<String>,
    /// Protocol state.
    pub conn_status: ConnStatus,
    /// Presence.
    pub user_status: UserStatus,
    /// A heartbeat ping is outstanding. Mirrors the session's heartbeat.
    pub timed_out: bool,
}

impl User {
    /// A freshly connected, not yet logged-in user.
    pub fn connected(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            nick: String::new(),
            public_key: None,
            conn_status: ConnStatus::Connected,
            user_status: UserStatus::Online,
            timed_out: false,
        }
    }
}
