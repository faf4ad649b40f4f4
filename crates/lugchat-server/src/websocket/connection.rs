//! Shared handle to one live session.
//!
//! The session task is the only writer of the [`User`] state held here; the
//! registry and broadcaster read it to decide who receives fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lugchat_core::ids::SessionId;
use lugchat_core::protocol::{ConnStatus, User};
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// A frame queued for the socket writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized envelope.
    Text(Arc<str>),
    /// Heartbeat ping.
    Ping,
    /// Close the socket; the writer stops after sending it.
    Close,
}

/// Registry-visible handle to a session.
pub struct SessionHandle {
    /// Unique session ID.
    pub id: SessionId,
    tx: mpsc::Sender<Outbound>,
    user: RwLock<User>,
    /// When the transport connected.
    pub connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl SessionHandle {
    /// Create a handle for a freshly connected client at `ip`.
    pub fn new(id: SessionId, ip: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            user: RwLock::new(User::connected(ip)),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `false` if the queue is full or the writer is gone, and
    /// increments the dropped message counter.
    pub fn send(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: Arc<str>) -> bool {
        self.send(Outbound::Text(text))
    }

    /// Total frames dropped for this session.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Snapshot of the user state.
    pub fn user(&self) -> User {
        self.user.read().clone()
    }

    /// Current protocol state.
    pub fn status(&self) -> ConnStatus {
        self.user.read().conn_status
    }

    /// Whether this session receives broadcasts.
    pub fn is_subscribed(&self) -> bool {
        self.status() == ConnStatus::Subscribed
    }

    /// Mutate the user state. Only the owning session calls this.
    pub(crate) fn update_user(&self, f: impl FnOnce(&mut User)) {
        f(&mut self.user.write());
    }

    /// Time since the transport connected.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
