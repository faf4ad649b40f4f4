//! # lugchat
//!
//! Chat server binary: loads settings and signing keys, then serves the
//! WebSocket endpoint until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lugchat_core::Identity;
use lugchat_core::logging::init_subscriber;
use lugchat_server::{LugchatServer, ServerConfig};
use lugchat_settings::{KeySettings, LugchatSettings};
use lugchat_store::StoreConfig;

/// Signed-message chat server.
#[derive(Parser, Debug)]
#[command(name = "lugchat-server", about = "Signed-message WebSocket chat server")]
struct Cli {
    /// Settings file (defaults to `~/.lugchat/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// PKCS#8 PEM private key file.
    #[arg(long)]
    private_key: Option<String>,

    /// SPKI PEM public key file.
    #[arg(long)]
    public_key: Option<String>,

    /// Generate a throwaway identity instead of loading key files.
    #[arg(long)]
    ephemeral_keys: bool,

    /// Log level filter (overridden by `RUST_LOG`).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Layer the flags over loaded settings.
    fn apply(&self, settings: &mut LugchatSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.private_key.is_some() {
            settings.keys.private_key_path.clone_from(&self.private_key);
        }
        if self.public_key.is_some() {
            settings.keys.public_key_path.clone_from(&self.public_key);
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<LugchatSettings> {
    let mut settings = match cli.config {
        Some(ref path) => lugchat_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => lugchat_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read key file: {}", path.display()))
}

/// Load the server identity from the configured key files, or generate one.
fn load_identity(keys: &KeySettings, ephemeral: bool) -> Result<Identity> {
    if ephemeral {
        tracing::warn!("using an ephemeral signing identity");
        return Identity::generate().context("Failed to generate signing key");
    }
    let (Some(private), Some(public)) = (&keys.private_key_path, &keys.public_key_path) else {
        bail!("signing keys not configured: set SIGNING_PRIVATE_KEY and SIGNING_PUBLIC_KEY or pass --ephemeral-keys");
    };
    let private = read_pem(Path::new(private))?;
    let public = read_pem(Path::new(public))?;
    Identity::from_pem(&private, &public).context("Failed to load signing keys")
}

fn server_config(settings: &LugchatSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        heartbeat_interval_ms: settings.server.heartbeat_interval_ms,
        send_queue_capacity: settings.server.send_queue_capacity,
        max_message_size: settings.server.max_message_size,
    }
}

fn store_config(settings: &LugchatSettings) -> StoreConfig {
    StoreConfig {
        max_duration_ms: settings.store.max_duration_ms,
        max_records: settings.store.max_records,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_subscriber(&settings.logging.level, settings.logging.json);

    let identity = load_identity(&settings.keys, cli.ephemeral_keys)?;
    tracing::info!(key_hash = identity.key_hash(), "signing identity loaded");

    let server = LugchatServer::new(
        server_config(&settings),
        Arc::new(identity),
        store_config(&settings),
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("lugchat listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(handle, None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
