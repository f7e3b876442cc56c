//! burrow agent - main entry point.
//!
//! Dials the broker and keeps the tunnel alive until SIGINT/SIGTERM.
//! Config load and client construction failures exit nonzero; connection
//! loss never does.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use burrow_agent::TunnelClient;
use burrow_config::Config;

#[derive(Parser)]
#[command(name = "burrow-agent", about = "Reverse-tunnel agent", version)]
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

    let client = TunnelClient::new(&config)?;
    info!(
        broker = %config.client.server.addr(),
        default_target = %config.client.proxy.default_target,
        rewrite_rules = config.client.proxy.rewrite_rules.len(),
        "agent starting"
    );

    tokio::select! {
        _ = client.run() => {}
        result = shutdown_signal() => {
            result?;
            info!("shutdown signal received, exiting");
        }
    }
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
