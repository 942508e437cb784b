//! Spacekit relay edge node binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spacekit_core::ValidateConfig;
use spacekit_core::tracing::{config::InstrumentationConfig, init::init_tracing};
use spacekit_relay::credentials::hash_secret;
use spacekit_relay::{RelayServer, RelayServerConfig};
use tracing::info;

/// Spacekit relay - routes public TLS and HTTP traffic to reverse-tunnel clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// Override the configured log level
    #[arg(long = "log-level")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Print the Argon2 hash of an API key for the `users` table
    HashSecret {
        secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::HashSecret { secret }) = &cli.command {
        println!("{}", hash_secret(secret)?);
        return Ok(());
    }

    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

    let config = match &cli.config {
        Some(path) => RelayServerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => RelayServerConfig::load().context("Failed to load configuration")?,
    };
    config.validate().context("Invalid configuration")?;

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| config.server.log_level.clone());
    let mut instrumentation = InstrumentationConfig::for_service("spacekit-relay", log_level);
    instrumentation.json = config.server.json_logs;
    init_tracing(&instrumentation)?;

    info!("Starting Spacekit relay");
    info!(
        secure_bind = %config.listeners.secure_bind,
        plain_bind = %config.listeners.plain_bind,
        "Configuration loaded. Changes require restart."
    );

    RelayServer::new(&config)?.run().await?;
    Ok(())
}
