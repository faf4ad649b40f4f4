//! Registry of live sessions.

use std::sync::Arc;

use dashmap::DashMap;
use lugchat_core::ids::SessionId;
use tracing::warn;

use super::connection::SessionHandle;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued to subscribers.
    pub delivered: usize,
    /// Subscribers whose queue was full or closed.
    pub failed: usize,
}

/// Live sessions keyed by [`SessionId`].
///
/// Removal may run concurrently with a fan-out; each shard is locked only
/// while it is being visited.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session.
    pub fn add(&self, handle: Arc<SessionHandle>) {
        let _ = self.sessions.insert(handle.id.clone(), handle);
    }

    /// Stop tracking a session. Returns `true` only for the call that
    /// actually removed it.
    pub fn remove(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Whether a session is tracked.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Visit every session currently in the subscribed state.
    pub fn for_each_subscribed(&self, mut f: impl FnMut(&Arc<SessionHandle>)) {
        for entry in &self.sessions {
            if entry.value().is_subscribed() {
                f(entry.value());
            }
        }
    }

    /// Queue `text` to every subscribed session. Failures are logged and
    /// counted, never retried.
    pub fn broadcast(&self, text: &Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.for_each_subscribed(|handle| {
            if handle.send_text(text.clone()) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                warn!(session_id = %handle.id, "failed to deliver broadcast");
            }
        });
        report
    }

    /// Number of tracked sessions.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of subscribed sessions.
    pub fn subscribed_count(&self) -> usize {
        let mut count = 0;
        self.for_each_subscribed(|_| count += 1);
        count
    }

    /// Nicks of logged-in sessions, sorted and deduplicated.
    pub fn online_nicks(&self) -> Vec<String> {
        let mut nicks: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.value().user())
            .filter(|user| user.conn_status.is_logged_in())
            .map(|user| user.nick)
            .collect();
        nicks.sort();
        nicks.dedup();
        nicks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lugchat_core::protocol::ConnStatus;
    use crate::websocket::connection::Outbound;
    use tokio::sync::mpsc;

    fn make_handle(
        nick: &str,
        status: ConnStatus,
        capacity: usize,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = SessionHandle::new(SessionId::new(), "127.0.0.1", tx);
        handle.update_user(|u| {
            u.nick = nick.into();
            u.conn_status = status;
        });
        (Arc::new(handle), rx)
    }

    #[test]
    fn add_and_remove_once() {
        let registry = Registry::new();
        let (h, _rx) = make_handle("a", ConnStatus::Connected, 4);
        let id = h.id.clone();
        registry.add(h);
        assert!(registry.contains(&id));
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_subscribed() {
        let registry = Registry::new();
        let (sub1, mut rx1) = make_handle("s1", ConnStatus::Subscribed, 4);
        let (sub2, mut rx2) = make_handle("s2", ConnStatus::Subscribed, 4);
        let (logged, mut rx3) = make_handle("l", ConnStatus::LoggedIn, 4);
        let (fresh, mut rx4) = make_handle("", ConnStatus::Connected, 4);
        let (paused, mut rx5) = make_handle("u", ConnStatus::Unsubscribed, 4);
        for h in [sub1, sub2, logged, fresh, paused] {
            registry.add(h);
        }

        let report = registry.broadcast(&Arc::from("{}"));
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert_eq!(rx1.recv().await.unwrap(), Outbound::Text(Arc::from("{}")));
        assert_eq!(rx2.recv().await.unwrap(), Outbound::Text(Arc::from("{}")));
        assert!(rx3.try_recv().is_err());
        assert!(rx4.try_recv().is_err());
        assert!(rx5.try_recv().is_err());
    }

    #[test]
    fn failed_delivery_does_not_stop_fan_out() {
        let registry = Registry::new();
        let (full, _rx_full) = make_handle("full", ConnStatus::Subscribed, 1);
        assert!(full.send(Outbound::Ping));
        let (gone, rx_gone) = make_handle("gone", ConnStatus::Subscribed, 1);
        drop(rx_gone);
        let (ok, _rx_ok) = make_handle("ok", ConnStatus::Subscribed, 1);
        registry.add(full.clone());
        registry.add(gone);
        registry.add(ok);

        let report = registry.broadcast(&Arc::from("x"));
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 2 });
        assert_eq!(full.drop_count(), 1);
    }

    #[test]
    fn counts_and_nicks() {
        let registry = Registry::new();
        let (a, _ra) = make_handle("zed", ConnStatus::Subscribed, 1);
        let (b, _rb) = make_handle("amy", ConnStatus::LoggedIn, 1);
        let (c, _rc) = make_handle("", ConnStatus::Connected, 1);
        let (d, _rd) = make_handle("amy", ConnStatus::Unsubscribed, 1);
        let (e, _re) = make_handle("bob", ConnStatus::Disconnected, 1);
        for h in [a, b, c, d, e] {
            registry.add(h);
        }
        assert_eq!(registry.connection_count(), 5);
        assert_eq!(registry.subscribed_count(), 1);
        assert_eq!(registry.online_nicks(), vec!["amy".to_string(), "zed".to_string()]);
    }

    #[test]
    fn removal_during_fan_out_from_another_thread() {
        let registry = Arc::new(Registry::new());
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for i in 0..64 {
            let (h, rx) = make_handle(&format!("n{i}"), ConnStatus::Subscribed, 1024);
            ids.push(h.id.clone());
            receivers.push(rx);
            registry.add(h);
        }

        let remover = {
            let registry = registry.clone();
            std::thread::spawn(move || ids.iter().filter(|id| registry.remove(id)).count())
        };
        for _ in 0..100 {
            let _ = registry.broadcast(&Arc::from("tick"));
        }
        assert_eq!(remover.join().unwrap(), 64);
        assert_eq!(registry.connection_count(), 0);
    }
}
