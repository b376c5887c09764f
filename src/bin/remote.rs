//! shroud-remote - tunnel egress endpoint with decoy fallback

use clap::Parser;
use shroud::config::Config;
use shroud::crypto::Cipher;
use shroud::inbound::TunnelListener;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shroud-remote")]
#[command(version = shroud::VERSION)]
#[command(about = "Tunnel egress endpoint of the shroud tunnel")]
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
    info!("shroud-remote v{}", shroud::VERSION);
    info!("Loading configuration from: {}", args.config.display());

    let config = match Config::load(&args.config.to_string_lossy()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if config.target_domain.is_empty() {
        error!("A decoy origin (target_domain) is required");
        std::process::exit(1);
    }

    let cipher = match Cipher::new(&config.method, &config.password) {
        Ok(cipher) => cipher,
        Err(e) => {
            error!("Failed to initialize cipher: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match TunnelListener::bind(
        &config.server,
        cipher,
        config.target_addr(),
        config.read_timeout(),
    )
    .await
    {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to listen on {}: {}", config.server, e);
            std::process::exit(1);
        }
    };

    info!("Decoy origin: {}", config.target_addr());
    let handle = tokio::spawn(listener.run());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    handle.abort();

    info!("shroud-remote stopped");
    Ok(())
}
