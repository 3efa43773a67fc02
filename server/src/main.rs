//! sqlgate server - MySQL wire protocol front end

mod acceptor;
mod config;
mod handlers;
mod registry;
mod session;

use acceptor::Server;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author = "sqlgate contributors")]
#[command(version)]
#[command(about = "sqlgate server - MySQL wire protocol front end", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => config::Config::default(),
    };
    if let Some(port) = args.port {
        config.general.bind_port = port;
    }
    if let Some(bind) = args.bind {
        config.general.bind_address = bind;
    }
    config.validate()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.level_filter()?.into()),
        )
        .init();

    info!("Starting sqlgate server v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("Loaded configuration from: {}", path.display());
    }

    let server = Server::bind(&config.bind_addr()).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                shutdown.quit();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
