//! `LugchatServer`: Axum HTTP + WebSocket server.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{Json, Response};
use axum::routing::get;
use lugchat_core::Identity;
use lugchat_core::ids::SessionId;
use lugchat_store::{MessageStore, StoreConfig};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcaster::Broadcaster;
use crate::websocket::handler::{EnvelopeStore, SessionContext};
use crate::websocket::registry::Registry;
use crate::websocket::session::{SessionOptions, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaborators handed to every session.
    pub ctx: SessionContext,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The chat server.
pub struct LugchatServer {
    config: Arc<ServerConfig>,
    ctx: SessionContext,
    broadcaster: Mutex<Option<Broadcaster>>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl LugchatServer {
    /// Create a server signing with `identity` and storing into a fresh
    /// store bounded by `store_config`.
    pub fn new(config: ServerConfig, identity: Arc<Identity>, store_config: StoreConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let (events, rx) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            identity,
            store: Arc::new(MessageStore::new(store_config)),
            registry: registry.clone(),
            events,
        };
        Self {
            config: Arc::new(config),
            ctx,
            broadcaster: Mutex::new(Some(Broadcaster::new(rx, registry))),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Bind the listener, start the broadcaster and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
        let local = listener.local_addr()?;

        match self.broadcaster.lock().take() {
            Some(broadcaster) => {
                let _ = tokio::spawn(broadcaster.run());
            }
            None => warn!("broadcaster already running"),
        }

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
            info!("listener stopped");
        });

        info!(%local, "listening");
        Ok((local, handle))
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    /// Message store.
    pub fn store(&self) -> &Arc<EnvelopeStore> {
        &self.ctx.store
    }

    /// Server signing identity.
    pub fn identity(&self) -> &Arc<Identity> {
        &self.ctx.identity
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.ctx.registry;
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.subscribed_count(),
        state.ctx.store.len(),
    ))
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let ip = client_ip(&headers, peer);
    let id = SessionId::new();
    let options = SessionOptions::from(state.config.as_ref());
    let cancel = state.shutdown.session_token();
    let shutdown = state.shutdown;
    let ctx = state.ctx;
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track_session(run_ws_session(socket, id, ip, ctx, options, cancel))
        })
}

/// Client address: the first `X-Forwarded-For` entry when present, else
/// the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| v.parse::<IpAddr>().is_ok())
        .map_or_else(|| peer.ip().to_string(), str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use tower::ServiceExt;

    fn make_server() -> LugchatServer {
        LugchatServer::new(
            ServerConfig::default(),
            Arc::new(Identity::generate().unwrap()),
            StoreConfig::default(),
        )
    }

    fn peer() -> SocketAddr {
        "192.0.2.7:5000".parse().unwrap()
    }

    #[test]
    fn accessors() {
        let server = make_server();
        assert_eq!(server.config().host, "0.0.0.0");
        assert_eq!(server.registry().connection_count(), 0);
        assert!(server.store().is_empty());
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["subscribed"], 0);
        assert_eq!(parsed["stored_messages"], 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn client_ip_defaults_to_peer() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "192.0.2.7");
    }

    #[test]
    fn client_ip_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn client_ip_ignores_garbage_header() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, peer()), "192.0.2.7");
    }
}
