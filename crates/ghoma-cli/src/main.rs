//! G-Homa CLI - control server for G-Homa WiFi smart plugs
//!
//! Accepts plug connections, tracks their state and prints device events.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod server;

/// G-Homa smart plug control server
#[derive(Parser)]
#[command(name = "ghoma")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "GHOMA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control server
    Serve {
        /// Bind address
        #[arg(short, long, env = "GHOMA_BIND")]
        bind: Option<String>,

        /// Port the plugs connect to
        #[arg(short = 'P', long, env = "GHOMA_PORT")]
        port: Option<u16>,

        /// Seconds without a heartbeat before a plug is dropped
        #[arg(long)]
        heartbeat_timeout: Option<u64>,

        /// Seconds a new connection has to complete the handshake
        #[arg(long)]
        handshake_timeout: Option<u64>,

        /// Print device events as JSON lines
        #[arg(long)]
        events_json: bool,
    },

    /// Show version and config location
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Serve {
            bind,
            port,
            heartbeat_timeout,
            handshake_timeout,
            events_json,
        } => {
            let mut config = config::load(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(secs) = heartbeat_timeout {
                config.heartbeat_timeout_secs = secs;
            }
            if let Some(secs) = handshake_timeout {
                config.handshake_timeout_secs = secs;
            }

            // Handle Ctrl+C
            let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for ctrl+c: {}", e),
                }
                let _ = shutdown_tx.send(()).await;
            });

            server::run_server(config, events_json, &mut shutdown_rx).await?;
        }

        Commands::Info => print_info(),
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

fn print_info() {
    println!("{}", "G-Homa control server".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!("Port:       {} (default)", ghoma_core::DEFAULT_PORT);
    match config::default_config_file() {
        Some(path) => println!("Config:     {}", path.display()),
        None => println!("Config:     {}", "no config directory".yellow()),
    }
}
