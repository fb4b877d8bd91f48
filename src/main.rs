//! Oculus Agent Binary Entry Point
//!
//! Runs the host telemetry and probe agent until SIGINT/SIGTERM.
//! Core functionality is provided by the `oculus_agent` library crate.

use std::sync::Arc;

use clap::Parser;
use oculus_agent::{AgentConfig, CollectionScheduler, HttpTransport, IdentityStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Oculus Agent - host telemetry and uptime probes
#[derive(Parser, Debug)]
#[command(name = "oculus-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", env = "OCULUS_AGENT_CONFIG")]
    config: String,

    /// Collector base URL (overrides config file)
    #[arg(long, env = "OCULUS_SERVER_URL")]
    server_url: Option<String>,

    /// Identity file path (overrides config file)
    #[arg(long)]
    identity_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oculus_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Oculus Agent v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AgentConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(url) = cli.server_url {
        config.server.url = url;
    }
    if let Some(path) = cli.identity_file {
        config.agent.identity_file = path;
    }
    config.validate()?;

    tracing::info!(
        "Collector: {}, metrics every {}s, heartbeat every {}s",
        config.server.url,
        config.collector.interval,
        config.collector.heartbeat_interval,
    );

    let transport = Arc::new(HttpTransport::new(&config.server)?);
    let store = IdentityStore::new(&config.agent.identity_file);
    let scheduler = CollectionScheduler::from_config(&config, transport, store)?;

    tracing::info!("Press Ctrl+C to shutdown");
    scheduler.run(shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that source is ignored rather than
/// stopping the agent.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
