//! # Ferry Server
//!
//! Encrypted realtime WebSocket server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ferry
//!
//! # Run with a specific config file
//! ferry --config /path/to/ferry.toml
//!
//! # Run with environment variables
//! FERRY_PORT=8080 FERRY_CRYPTO__KEY=... ferry
//! ```

mod config;
mod handlers;
mod metrics;
mod services;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Encrypted realtime WebSocket server")]
#[command(version)]
struct Cli {
    /// Config file to load instead of the default search paths
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry=debug,ferry_core=debug,ferry_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match cli.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Ferry server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
