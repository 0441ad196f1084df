//! aerolinkd entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use aerolink_server::config::DaemonConfig;
use aerolink_server::server;

/// TLS routing daemon for the aerolink CPDLC network.
#[derive(Parser, Debug)]
#[command(name = "aerolinkd", about = "aerolink CPDLC routing daemon")]
struct Args {
    /// Configuration file path.
    #[arg(short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stay in the foreground.
    #[arg(short = 'd')]
    foreground: bool,

    /// Override the default port for listen directives without one.
    #[arg(short = 'p', value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Structured logging, controlled via the RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(port) = args.port {
        config.default_port = port;
    }
    if !args.foreground {
        // Backgrounding is the service manager's job these days.
        info!("running in the foreground; use -d to silence this note");
    }

    server::run(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "can't listen for SIGINT");
            std::future::pending::<()>().await;
        }
    })
    .await
}
