//! Fling relay - signaling server for room-code based transfers
//!
//! The relay parks session descriptions under short-lived room codes so
//! two peers can find each other. File bytes never pass through it.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with defaults (0.0.0.0:8080, 300s rooms)
//! fling-relay
//!
//! # Bind elsewhere with shorter rooms
//! fling-relay --bind 127.0.0.1 --port 9090 --room-ttl 120
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::MissedTickBehavior;

use fling_core::config::RelayConfig;
use fling_core::relay::SignalingService;
use fling_core::store::MemoryStore;
use fling_core::web::RelayServer;

/// Fling relay server
#[derive(Debug, Parser)]
#[command(name = "fling-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "FLING_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Room lifetime in seconds
    #[arg(long, value_name = "SECS")]
    room_ttl: Option<u64>,

    /// Interval between sweeps of lapsed rooms, in seconds
    #[arg(long, value_name = "SECS")]
    sweep_interval: Option<u64>,

    /// Refuse cross-origin browser requests
    #[arg(long)]
    no_cors: bool,
}

impl Cli {
    /// Resolve the effective configuration: file first, flags on top.
    fn resolve_config(&self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.room_ttl {
            config.room_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.sweep_interval {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if self.no_cors {
            config.permissive_cors = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    let store = MemoryStore::new();
    let service = Arc::new(SignalingService::with_ttl(store.clone(), config.room_ttl));

    let sweeper = spawn_sweeper(store, config.sweep_interval);

    let server = RelayServer::new(config, service);
    server.run(shutdown_signal()).await?;

    sweeper.abort();
    Ok(())
}

/// Periodically drop lapsed store entries so idle rooms do not pile up.
fn spawn_sweeper(store: MemoryStore, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "swept lapsed rooms");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,fling_relay=info,fling_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
