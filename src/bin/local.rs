//! shroud-local - SOCKS5 ingress endpoint

use clap::Parser;
use shroud::config::Config;
use shroud::crypto::Cipher;
use shroud::inbound::Socks5Listener;
use shroud::outbound::{ActiveRequests, CoverTicker, TunnelClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// In-flight request slots tracked for the cover ticker
const ACTIVE_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "shroud-local")]
#[command(version = shroud::VERSION)]
#[command(about = "SOCKS5 ingress endpoint of the shroud tunnel")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shroud=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("shroud-local v{}", shroud::VERSION);
    info!("Loading configuration from: {}", args.config.display());

    let config = match Config::load(&args.config.to_string_lossy()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let cipher = match Cipher::new(&config.method, &config.password) {
        Ok(cipher) => cipher,
        Err(e) => {
            error!("Failed to initialize cipher: {}", e);
            std::process::exit(1);
        }
    };

    let idle = config.read_timeout();
    let client = Arc::new(TunnelClient::new(config.server.clone(), cipher));
    let active = ActiveRequests::new(ACTIVE_CAPACITY);

    let listener =
        match Socks5Listener::bind(&config.local, client.clone(), active.clone(), idle).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to listen on {}: {}", config.local, e);
                std::process::exit(1);
            }
        };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();
    handles.push(tokio::spawn(listener.run()));

    if !config.target_domain.is_empty() {
        info!("Cover traffic enabled towards {}", config.target_addr());
        let ticker = CoverTicker::new(
            client,
            active,
            config.target_domain.clone(),
            config.target_port,
            shutdown_rx,
        );
        handles.push(tokio::spawn(ticker.run()));
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        handle.abort();
    }

    info!("shroud-local stopped");
    Ok(())
}
