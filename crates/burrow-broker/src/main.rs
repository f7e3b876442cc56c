//! burrow broker - main entry point.
//!
//! Binds the public HTTP(S) listener and the framed tunnel listener, then
//! runs until SIGINT/SIGTERM. Config load and bind failures exit nonzero.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use burrow_broker::{
    tls, AgentRegistry, BrokerError, HttpFrontend, RequestTracker, TunnelListener,
};
use burrow_config::Config;

#[derive(Parser)]
#[command(name = "burrow-broker", about = "Reverse-tunnel broker", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    burrow_common::init_tracing("info");
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            Config::load(path)?
        }
        None => {
            info!("no configuration specified, using built-in defaults");
            Config::default()
        }
    };

    let registry = Arc::new(AgentRegistry::new(config.limits.max_frame_bytes));
    let tracker = Arc::new(RequestTracker::new());

    let http_tls = tls::server_tls_acceptor(&config.server.http.ssl)?;
    let socket_tls = tls::server_tls_acceptor(&config.server.socket.ssl)?;

    let http_addr = config.server.http.addr();
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .map_err(|source| BrokerError::Bind {
            endpoint: "http",
            addr: http_addr.clone(),
            source,
        })?;
    info!(addr = %http_addr, tls = http_tls.is_some(), "HTTP listener bound");

    let socket_addr = config.server.socket.addr();
    let socket_listener = TcpListener::bind(&socket_addr)
        .await
        .map_err(|source| BrokerError::Bind {
            endpoint: "tunnel",
            addr: socket_addr.clone(),
            source,
        })?;
    info!(addr = %socket_addr, tls = socket_tls.is_some(), "tunnel listener bound");

    let frontend = Arc::new(HttpFrontend::new(
        Arc::clone(&registry),
        Arc::clone(&tracker),
        config.request_timeout(),
    ));
    let tunnel = Arc::new(TunnelListener::new(
        registry,
        tracker,
        config.limits.max_frame_bytes,
    ));

    tokio::spawn(frontend.run(http_listener, http_tls));
    tokio::spawn(tunnel.run(socket_listener, socket_tls));

    shutdown_signal().await?;
    info!("shutdown signal received, exiting");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
