//! Transport driver for one WebSocket client, from upgrade to close.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use lugchat_core::ids::SessionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;

use super::connection::{Outbound, SessionHandle};
use super::handler::{Session, SessionContext, TeardownReason};
use super::heartbeat;

/// How long the writer gets to flush the close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session transport settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Time between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            send_queue_capacity: config.send_queue_capacity,
        }
    }
}

/// Run a session for an upgraded socket.
///
/// Inbound frames, heartbeat ticks and shutdown are all handled on this one
/// task, so the session state machine never sees two events at once. A
/// separate writer task drains the outbound queue to the socket.
///
/// `cancel` belongs to this session alone; server shutdown cancels it
/// through its parent.
#[instrument(skip_all, fields(session_id = %id, ip = %ip))]
pub async fn run_ws_session(
    ws: WebSocket,
    id: SessionId,
    ip: String,
    ctx: SessionContext,
    options: SessionOptions,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(options.send_queue_capacity.max(1));
    let handle = Arc::new(SessionHandle::new(id, ip, send_tx));
    ctx.registry.add(handle.clone());
    info!("client connected");

    let mut session = Session::new(handle.clone(), ctx, cancel.clone());

    let mut outbound = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            let result = match frame {
                Outbound::Text(text) => ws_tx.send(Message::Text(text.as_ref().into())).await,
                Outbound::Ping => ws_tx.send(Message::Ping(Vec::new().into())).await,
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut ticker = heartbeat::interval(options.heartbeat_interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = session.teardown(TeardownReason::ServerShutdown);
            }
            _ = ticker.tick() => {
                let _ = session.heartbeat_tick();
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = session.handle_frame(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = session.handle_bytes(&data);
                }
                Some(Ok(Message::Pong(_))) => session.acknowledge_heartbeat(),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("client closed the socket");
                    let _ = session.teardown(TeardownReason::ClientClosed);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "websocket error");
                    let _ = session.teardown(TeardownReason::TransportError);
                }
            },
        }
        if session.is_torn_down() {
            break;
        }
    }

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut outbound).await.is_err() {
        outbound.abort();
    }

    info!(
        duration_ms = u64::try_from(handle.age().as_millis()).unwrap_or(u64::MAX),
        dropped = handle.drop_count(),
        "client disconnected"
    );
}
