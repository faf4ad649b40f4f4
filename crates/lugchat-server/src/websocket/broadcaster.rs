//! Single consumer of [`SessionEvent`]s.
//!
//! Accepted envelopes are serialized once and fanned out to every subscribed
//! session. Disconnects remove the session from the registry.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use super::handler::SessionEvent;
use super::registry::{BroadcastReport, Registry};

/// Drains the session event channel.
pub struct Broadcaster {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster reading from `rx`.
    pub fn new(rx: mpsc::UnboundedReceiver<SessionEvent>, registry: Arc<Registry>) -> Self {
        Self { rx, registry }
    }

    /// Run until every sender is dropped.
    #[instrument(skip_all, name = "broadcaster")]
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let _ = self.handle_event(event);
        }
        info!("event channel closed, broadcaster stopped");
    }

    /// Apply one event. Returns the delivery report for fan-out events.
    pub fn handle_event(&self, event: SessionEvent) -> Option<BroadcastReport> {
        match event {
            SessionEvent::Accepted { from, envelope } => {
                let json: Arc<str> = match serde_json::to_string(&*envelope) {
                    Ok(json) => Arc::from(json),
                    Err(e) => {
                        error!(error = %e, session_id = %from, "failed to serialize broadcast");
                        return None;
                    }
                };
                let report = self.registry.broadcast(&json);
                debug!(
                    session_id = %from,
                    time = envelope.message.time,
                    delivered = report.delivered,
                    failed = report.failed,
                    "message fanned out"
                );
                Some(report)
            }
            SessionEvent::Disconnected { id, reason } => {
                let removed = self.registry.remove(&id);
                debug!(session_id = %id, ?reason, removed, "session removed");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
