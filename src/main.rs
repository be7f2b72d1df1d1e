//! TunnelProxy - HTTP CONNECT tunnel proxy

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnelproxy::{
    config::ConfigManager,
    metrics::{Metrics, MetricsServer},
    shutdown::ShutdownAwareTask,
    ConnectionManager, ShutdownCoordinator,
};

/// CLI arguments for TunnelProxy
#[derive(Parser, Debug)]
#[command(name = "tunnelproxy")]
#[command(about = "TunnelProxy - HTTP CONNECT tunnel proxy")]
#[command(version)]
#[command(long_about = "
TunnelProxy - HTTP CONNECT tunnel proxy

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  TUNNELPROXY_BIND_ADDR        - Bind address (e.g., 127.0.0.1:8080)
  TUNNELPROXY_MAX_CONNECTIONS  - Maximum concurrent connections
  TUNNELPROXY_CONNECT_TIMEOUT  - Remote connect timeout (e.g., 10s)
  TUNNELPROXY_BUFFER_SIZE      - Relay buffer size in bytes
  TUNNELPROXY_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:8080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Remote connect timeout in seconds
    #[arg(long, help = "Remote connect timeout in seconds")]
    pub timeout: Option<u64>,

    /// Buffer size in bytes
    #[arg(long, help = "Relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.timeout,
        args.buffer_size,
    );

    init_tracing(&args, &config.monitoring.log_level)?;

    info!("Starting TunnelProxy v{}", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        info!("Config file {} not found, used environment and defaults", args.config.display());
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Connect timeout: {:?}", config.server.connect_timeout);
        info!("  Relay timeout: {:?}", config.server.relay_timeout);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!(
            "  Access control: {} ({} rules)",
            if config.access_control.enabled { "enabled" } else { "disabled" },
            config.access_control.rules.len()
        );
        return Ok(());
    }

    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));

    let metrics = match config.monitoring.metrics_addr {
        Some(_) => Some(Arc::new(Metrics::new()?)),
        None => None,
    };

    let metrics_task = match (config.monitoring.metrics_addr, &metrics) {
        (Some(addr), Some(metrics)) => {
            let server =
                MetricsServer::new(Arc::clone(metrics), addr).with_request_timeout(config.server.handshake_timeout);
            Some(ShutdownAwareTask::spawn(&shutdown_coordinator, "metrics-server", async move {
                if let Err(e) = server.start().await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        _ => None,
    };

    let mut connection_manager = ConnectionManager::new(Arc::new(config), metrics);
    let bound = connection_manager.bind().await?;

    let server_coordinator = Arc::clone(&shutdown_coordinator);
    let mut shutdown_rx = shutdown_coordinator.subscribe();
    let server_handle = tokio::spawn(async move {
        let mut manager = connection_manager;

        tokio::select! {
            result = manager.start() => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Server task received shutdown signal");
                if let Err(e) = server_coordinator.shutdown_connection_manager(&manager).await {
                    error!("Error while draining tunnels: {}", e);
                }
            }
        }
    });

    info!("TunnelProxy listening on {}", bound);

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    if let Some(task) = metrics_task {
        if let Err(e) = task.wait_for_completion_or_shutdown().await {
            warn!("Metrics server stopped with error: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config_level: &str) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(config_level)
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
