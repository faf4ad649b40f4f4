//! Per-connection protocol state machine.
//!
//! [`Session`] turns one inbound frame into one signed reply, in order:
//!
//! 1. parse the envelope (`reject/format` with `responseToType=unknown` on failure)
//! 2. once logged in, verify the signature against the captured key (`reject/signature`)
//! 3. gate on login state (`reject/access`) and decode the typed payload (`reject/format`)
//! 4. apply the state change and reply
//! 5. for an accepted `post`, store the original envelope and emit [`SessionEvent::Accepted`]
//!
//! Unrecognised message types are logged and accepted with empty content;
//! they change nothing.
//!
//! A rejected frame never changes state, never reaches the store, and never
//! reaches the broadcaster. `handle_frame` is synchronous, so frames of one
//! session are processed strictly one after another.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use lugchat_core::Identity;
use lugchat_core::codec;
use lugchat_core::ids::SessionId;
use lugchat_core::protocol::{
    ClientEnvelope, ClientPayload, ConnStatus, HelloPayload, HistoryPayload, MessageType,
    RejectReason, ServerMessage, UserStatus,
};
use lugchat_store::MessageStore;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{Outbound, SessionHandle};
use super::heartbeat::{Heartbeat, HeartbeatAction};
use super::registry::Registry;

/// Store of accepted client envelopes keyed by their declared time.
pub type EnvelopeStore = MessageStore<Arc<ClientEnvelope>>;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Two heartbeat pings went unanswered.
    HeartbeatTimeout,
    /// The client closed the socket.
    ClientClosed,
    /// The client sent `disconnect`.
    ClientDisconnect,
    /// The socket failed.
    TransportError,
    /// The server is shutting down.
    ServerShutdown,
}

/// Notification from a session to the broadcaster.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message was accepted and should be fanned out unchanged.
    Accepted {
        /// Sending session.
        from: SessionId,
        /// The client's original signed envelope.
        envelope: Arc<ClientEnvelope>,
    },
    /// A session was torn down. Emitted exactly once per session.
    Disconnected {
        /// Session that ended.
        id: SessionId,
        /// Why it ended.
        reason: TeardownReason,
    },
}

/// Shared collaborators every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Server signing identity.
    pub identity: Arc<Identity>,
    /// Message store.
    pub store: Arc<EnvelopeStore>,
    /// Live sessions, read for `users`.
    pub registry: Arc<Registry>,
    /// Channel to the broadcaster.
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Accepted outcome of a dispatched message.
enum Accepted {
    /// Reply with this content, nothing else.
    Reply(Value),
    /// Reply, then store and broadcast the original envelope.
    Publish,
    /// Reply, then tear down.
    Leave,
}

/// Protocol state machine for one connection.
pub struct Session {
    handle: Arc<SessionHandle>,
    ctx: SessionContext,
    heartbeat: Heartbeat,
    client_key: Option<VerifyingKey>,
    torn_down: bool,
}

impl Session {
    /// Create a session. `cancel` is cancelled on teardown; cancelling it
    /// from outside asks the session loop to shut down.
    pub fn new(handle: Arc<SessionHandle>, ctx: SessionContext, cancel: CancellationToken) -> Self {
        Self {
            handle,
            ctx,
            heartbeat: Heartbeat::new(cancel),
            client_key: None,
            torn_down: false,
        }
    }

    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.handle.id
    }

    /// Shared handle.
    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    /// Current protocol state.
    pub fn status(&self) -> ConnStatus {
        self.handle.status()
    }

    /// Token cancelled when this session ends.
    pub fn cancellation(&self) -> CancellationToken {
        self.heartbeat.token()
    }

    /// Whether [`Self::teardown`] has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Process one text frame. Returns the reply that was queued.
    pub fn handle_frame(&mut self, raw: &str) -> ServerMessage {
        self.handle_bytes(raw.as_bytes())
    }

    /// Process one frame given as raw bytes (binary frames).
    pub fn handle_bytes(&mut self, raw: &[u8]) -> ServerMessage {
        let envelope: ClientEnvelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, len = raw.len(), "unparseable frame");
                return self.respond(ServerMessage::unparseable());
            }
        };

        let kind = envelope.message.kind.clone();
        let sig = envelope.sig.clone();

        if self.status().is_logged_in() && !self.verify(&envelope) {
            warn!(msg_type = %kind, "signature verification failed");
            return self.respond(ServerMessage::reject(kind, sig, RejectReason::Signature));
        }

        match self.dispatch(&envelope) {
            Err(reason) => {
                debug!(msg_type = %kind, ?reason, "message rejected");
                self.respond(ServerMessage::reject(kind, sig, reason))
            }
            Ok(Accepted::Reply(content)) => self.respond(ServerMessage::accept(kind, sig, content)),
            Ok(Accepted::Publish) => {
                let reply = self.respond(ServerMessage::accept(kind, sig, json!({})));
                self.publish(envelope);
                reply
            }
            Ok(Accepted::Leave) => {
                let reply = self.respond(ServerMessage::accept(kind, sig, json!({})));
                let _ = self.teardown(TeardownReason::ClientDisconnect);
                reply
            }
        }
    }

    fn verify(&self, envelope: &ClientEnvelope) -> bool {
        self.client_key
            .as_ref()
            .is_some_and(|key| codec::verify_with_key(envelope, key))
    }

    fn dispatch(&mut self, envelope: &ClientEnvelope) -> Result<Accepted, RejectReason> {
        let message = &envelope.message;
        let status = self.status();
        if status == ConnStatus::Disconnected
            || (message.kind.requires_login() && !status.is_logged_in())
        {
            return Err(RejectReason::Access);
        }
        if message.kind == MessageType::Hello && status != ConnStatus::Connected {
            return Err(RejectReason::Access);
        }

        let payload = ClientPayload::decode(&message.kind, &message.content).map_err(|e| {
            debug!(error = %e, "undecodable content");
            RejectReason::Format
        })?;

        match payload {
            ClientPayload::Hello(hello) => self.login(envelope, hello).map(Accepted::Reply),
            ClientPayload::Subscribe(subscribe) => {
                self.set_status(ConnStatus::Subscribed);
                debug!(last_client_time = subscribe.last_client_time, "subscribed");
                Ok(Accepted::Reply(json!({
                    "oldestMessageTime": self.ctx.store.oldest(),
                    "latestMessageTime": self.ctx.store.newest(),
                })))
            }
            ClientPayload::Unsubscribe => {
                self.set_status(ConnStatus::Unsubscribed);
                debug!("unsubscribed");
                Ok(Accepted::Reply(json!({})))
            }
            ClientPayload::Users => Ok(Accepted::Reply(json!({
                "users": self.ctx.registry.online_nicks(),
            }))),
            ClientPayload::History(window) => self.history(window).map(Accepted::Reply),
            ClientPayload::Post(post) => {
                debug!(len = post.post_content.len(), "post accepted");
                Ok(Accepted::Publish)
            }
            ClientPayload::Disconnect => Ok(Accepted::Leave),
            ClientPayload::Ignored(kind) => {
                warn!(msg_type = %kind, "unrecognised message type, accepted without effect");
                Ok(Accepted::Reply(json!({})))
            }
        }
    }

    /// Capture the client's key and nick, then check the hello was signed
    /// with that key.
    fn login(&mut self, envelope: &ClientEnvelope, hello: HelloPayload) -> Result<Value, RejectReason> {
        let key = codec::parse_public_key(&hello.public_key).map_err(|e| {
            debug!(error = %e, "hello carries an unusable public key");
            RejectReason::Format
        })?;
        if !codec::verify_with_key(envelope, &key) {
            warn!("hello not signed by the key it declares");
            return Err(RejectReason::Signature);
        }

        let nick = envelope.message.nick.clone();
        info!(nick = %nick, key_hash = %envelope.key_hash, "user logged in");
        self.handle.update_user(|user| {
            user.nick = nick;
            user.public_key = Some(hello.public_key);
            user.conn_status = ConnStatus::LoggedIn;
            user.user_status = UserStatus::Online;
        });
        self.client_key = Some(key);

        Ok(json!({ "serverKey": self.ctx.identity.public_key_pem() }))
    }

    fn history(&self, window: HistoryPayload) -> Result<Value, RejectReason> {
        let records: Vec<Arc<ClientEnvelope>> = self
            .ctx
            .store
            .range_exclusive(window.start, window.end)
            .into_iter()
            .map(|(_, envelope)| envelope)
            .collect();
        debug!(start = window.start, end = window.end, count = records.len(), "history query");
        let list = serde_json::to_value(&records).map_err(|e| {
            error!(error = %e, "failed to serialize history");
            RejectReason::Exception
        })?;
        Ok(json!({ "msgList": list }))
    }

    fn publish(&self, envelope: ClientEnvelope) {
        let envelope = Arc::new(envelope);
        let _ = self.ctx.store.set(envelope.message.time, envelope.clone());
        let event = SessionEvent::Accepted {
            from: self.handle.id.clone(),
            envelope,
        };
        if self.ctx.events.send(event).is_err() {
            warn!("broadcaster is gone, message stored but not fanned out");
        }
    }

    fn set_status(&self, status: ConnStatus) {
        self.handle.update_user(|user| user.conn_status = status);
    }

    /// Sign `message` and queue it to this client. Returns `message`.
    fn respond(&self, message: ServerMessage) -> ServerMessage {
        match self.ctx.identity.sign(&message) {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if !self.handle.send_text(Arc::from(json)) {
                        warn!("failed to enqueue reply (queue full or closed)");
                    }
                }
                Err(e) => error!(error = %e, "failed to serialize reply"),
            },
            Err(e) => error!(error = %e, "failed to sign reply"),
        }
        message
    }

    /// Advance the heartbeat one interval: ping, or tear down if the last
    /// ping went unanswered.
    pub fn heartbeat_tick(&mut self) -> HeartbeatAction {
        let action = self.heartbeat.tick();
        match action {
            HeartbeatAction::Ping => {
                self.handle.update_user(|user| user.timed_out = true);
                if !self.handle.send(Outbound::Ping) {
                    debug!("heartbeat ping not queued");
                }
            }
            HeartbeatAction::Expire => {
                warn!("client missed heartbeat, disconnecting");
                let _ = self.teardown(TeardownReason::HeartbeatTimeout);
            }
        }
        action
    }

    /// Record a pong.
    pub fn acknowledge_heartbeat(&mut self) {
        self.heartbeat.acknowledge();
        self.handle.update_user(|user| user.timed_out = false);
    }

    /// End the session: stop the heartbeat, mark the user offline, close
    /// the socket, and emit [`SessionEvent::Disconnected`].
    ///
    /// Returns `true` the first time; later calls do nothing.
    pub fn teardown(&mut self, reason: TeardownReason) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.heartbeat.stop();
        self.handle.update_user(|user| {
            user.conn_status = ConnStatus::Disconnected;
            user.user_status = UserStatus::Offline;
        });
        let _ = self.handle.send(Outbound::Close);
        info!(?reason, "session torn down");

        let event = SessionEvent::Disconnected {
            id: self.handle.id.clone(),
            reason,
        };
        if self.ctx.events.send(event).is_err() {
            warn!("broadcaster is gone, registry entry not removed");
        }
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
