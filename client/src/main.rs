//! sqlgate - MySQL protocol probe client
//!
//! Logs in to a server, runs the given commands and prints each response.

mod probe;

use anyhow::Result;
use clap::Parser;
use probe::{ProbeClient, ProbeCommand};
use tracing::info;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "sqlgate")]
#[command(author = "sqlgate contributors")]
#[command(version)]
#[command(about = "Probe a MySQL protocol server", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 3306)]
    port: u16,

    /// User name sent in the handshake response
    #[arg(short, long, default_value = "root")]
    user: String,

    /// Initial schema
    #[arg(short, long)]
    database: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Commands to run: `ping` or `query:<sql>`
    commands: Vec<ProbeCommand>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let mut client = ProbeClient::connect(&args.host, args.port).await?;
    client.login(&args.user, args.database.as_deref()).await?;
    if let Some(greeting) = client.greeting() {
        println!(
            "Connected to server {} as connection {}",
            greeting.server_version, greeting.connection_id
        );
    }

    for command in &args.commands {
        let response = client.execute(command).await?;
        println!("{}: {}", command, probe::describe(&response));
    }

    client.quit().await?;
    info!("Disconnected");
    Ok(())
}
