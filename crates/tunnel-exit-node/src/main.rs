//! Tunnel relay
//!
//! Runs the registration (control) channel that tunnel clients use to claim
//! public hosts, and holds the registry the data plane routes by.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnel_control::ControlListener;
use tunnel_exit_node::{ConfigOverrides, Properties};
use tunnel_router::TunnelRegistry;

/// Tunnel relay - accepts tunnel client registrations
#[derive(Parser, Debug)]
#[command(name = "tunnel-relay")]
#[command(about = "Run the tunnel relay registration server", long_about = None)]
#[command(version)]
struct Cli {
    /// Properties file with register.* settings
    #[arg(long, env = "TUNNEL_CONFIG", default_value = "server.properties")]
    config: PathBuf,

    /// Control port for client registrations (overrides register.port)
    #[arg(long, env = "TUNNEL_REGISTER_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    info!("Starting tunnel relay");

    let props = Properties::load(&cli.config);
    let overrides = ConfigOverrides { port: cli.port };
    let config = overrides
        .apply(&props)
        .with_context(|| format!("Invalid relay configuration in {:?}", cli.config))?;

    info!("Tunnel control: {}", config.bind_addr);
    info!(
        "Idle timeout: {}s, max frame: {} bytes, ack: {}, cleanup: {:?}",
        config.idle_timeout.as_secs(),
        config.max_frame_length,
        config.send_ack,
        config.cleanup_policy
    );

    let registry = Arc::new(TunnelRegistry::new());
    let listener = ControlListener::new(config, registry.clone());
    let shutdown = listener.shutdown_token();

    let listener_handle = tokio::spawn(async move {
        // Bind failures are already logged by the listener; the relay keeps
        // running until it is signalled.
        if let Err(e) = listener.run().await {
            error!("Tunnel control listener exited: {}", e);
        }
    });

    info!("Press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping relay...");
        }
        Err(err) => {
            error!("Error listening for shutdown signal: {}", err);
        }
    }

    shutdown.cancel();
    if let Err(e) = listener_handle.await {
        error!("Tunnel control listener task failed: {}", e);
    }

    for tunnel in registry.all_tunnels() {
        warn!(
            "Tunnel {} for client {} still registered on {}",
            tunnel.host(),
            tunnel.client_name(),
            tunnel.connection_id()
        );
    }
    info!("Tunnel relay stopped");

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
