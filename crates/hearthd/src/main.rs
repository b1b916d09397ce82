//! hearthd - MCP gateway for a home-automation backend
//!
//! Subcommands:
//! - `hearthd serve` - Run the gateway (SSE ↔ backend WebSocket bridge)
//! - `hearthd ping <url>` - Test connectivity to a backend WebSocket
//! - `hearthd generate-cert` - Write a self-signed TLS certificate

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use hearthconf::HearthConfig;
use hearthd::{serve, tls};
use hearthlink::{BackendLink, LinkConfig, LinkState};

#[derive(Parser)]
#[command(name = "hearthd")]
#[command(about = "MCP gateway for a home-automation backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway server
    Serve {
        /// Config file path (overrides discovery)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,

        /// Override the configured bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Test connectivity to a backend WebSocket endpoint
    Ping {
        /// WebSocket URL (e.g., ws://localhost:8123/api/websocket)
        url: String,

        /// Access token for the handshake
        #[arg(short, long)]
        token: String,

        /// Timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout: u64,
    },

    /// Generate a self-signed TLS certificate
    GenerateCert {
        /// Hostname for the certificate subject
        #[arg(long, default_value = "localhost")]
        hostname: String,

        /// Config file path (overrides discovery)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, host } => {
            let mut config = HearthConfig::load_from(config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }

            init_tracing(&config.log_level);
            serve::run(config).await?;
        }

        Commands::Ping { url, token, timeout } => {
            init_tracing("info");
            ping(&url, &token, timeout).await?;
        }

        Commands::GenerateCert { hostname, config } => {
            init_tracing("info");
            let config = HearthConfig::load_from(config.as_deref())
                .context("Failed to load configuration")?;
            let paths = tls::CertPaths::resolve(&config.tls)?;
            tls::generate_self_signed(&hostname, &paths)?;
            println!("Certificate: {}", paths.cert.display());
            println!("Private key: {}", paths.key.display());
        }
    }

    Ok(())
}

/// RUST_LOG wins over the configured level.
fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Connect, authenticate, and round-trip one ping command.
async fn ping(url: &str, token: &str, timeout_ms: u64) -> Result<()> {
    let deadline = Duration::from_millis(timeout_ms);
    let config = LinkConfig::new(url, token).with_command_timeout(deadline);
    let link = BackendLink::spawn(config);

    let start = std::time::Instant::now();
    while !link.is_connected() {
        if link.state() == LinkState::Down {
            bail!("Backend is unreachable: {url}");
        }
        if start.elapsed() > deadline {
            bail!("Timed out connecting to {url} ({})", link.state());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let response = link
        .send_command(serde_json::json!({"type": "ping"}))
        .await
        .context("Ping command failed")?;
    println!(
        "Backend at {url} is up ({}ms): {}",
        start.elapsed().as_millis(),
        response
    );

    link.shutdown();
    Ok(())
}
