//! # vigil-relay
//!
//! Relay server binary: loads layered settings, starts the HTTP/WebSocket
//! server, and drains connections on SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use vigil_core::logging::{LogFormat, init_subscriber};
use vigil_server::config::ServerConfig;
use vigil_server::server::RelayServer;
use vigil_settings::VigilSettings;

/// How long to wait for the serve task once shutdown has completed.
const SERVE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Vigil inspector relay.
#[derive(Parser, Debug)]
#[command(name = "vigil-relay", about = "Session monitoring relay and problems board")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file.
    #[arg(long, env = "VIGIL_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log level or `EnvFilter` directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: compact or json (overrides settings).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Load settings from file and env, then layer the flags on top.
    fn resolve_settings(&self) -> Result<VigilSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(vigil_settings::settings_path);
        let mut settings = vigil_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
        vigil_settings::validate(&settings).context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = vigil_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = Arc::new(RelayServer::new(ServerConfig::from(&settings.server), metrics));

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    tracing::info!("Vigil relay listening on ws://{addr}/ws");

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    let delivery = server.shutdown_gracefully(None).await;
    tracing::info!(notified = delivery.delivered, "connections notified");
    if tokio::time::timeout(SERVE_DRAIN_TIMEOUT, handle).await.is_err() {
        tracing::warn!("server task did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
