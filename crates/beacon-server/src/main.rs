//! # Beacon Server
//!
//! Counts live client sessions. Clients create a session, ping it while
//! active, and the server reports how many sessions pinged within the TTL.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (Redis on 127.0.0.1:6379, listen on :8081)
//! beacon
//!
//! # Run with custom config
//! beacon --config /path/to/beacon.toml
//!
//! # Override addresses
//! beacon --listen-addr :8081 --redis-addr 10.0.0.5:6379
//!
//! # Run with environment variables
//! BEACON_PORT=8080 BEACON_HOST=0.0.0.0 beacon
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "beacon", version, about = "Live session counting server")]
struct Cli {
    /// Configuration file (defaults to beacon.toml, /etc/beacon, ~/.config/beacon).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. :8081 or 127.0.0.1:8081.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Redis address, e.g. 127.0.0.1:6379 or redis://host:port/db.
    #[arg(long)]
    redis_addr: Option<String>,

    /// Presence store backend.
    #[arg(long, value_enum)]
    store: Option<config::StoreBackend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "beacon=info,beacon_core=info,beacon_server=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(addr) = &cli.listen_addr {
        config.set_listen_addr(addr)?;
    }
    if let Some(addr) = cli.redis_addr {
        config.store.redis_addr = addr;
    }
    if let Some(backend) = cli.store {
        config.store.backend = backend;
    }
    config.validate()?;

    tracing::info!(
        "Starting Beacon server on {}:{} (store: {:?}, ttl: {}s)",
        config.host,
        config.port,
        config.store.backend,
        config.presence.ttl_secs
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
