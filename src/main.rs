//! pgsniff - PostgreSQL wire protocol sniffing proxy

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgsniff::{
    config::{CliOverrides, ConfigManager},
    events::{EventSink, LogEventSink, PayloadFormat},
    metrics::{Metrics, MetricsServer},
    Config, ConnectionManager, RelayEngine, ShutdownCoordinator,
};

/// CLI arguments for pgsniff
#[derive(Parser, Debug)]
#[command(name = "pgsniff")]
#[command(about = "Transparent PostgreSQL wire protocol sniffing proxy")]
#[command(version)]
#[command(long_about = "
Transparent PostgreSQL wire protocol sniffing proxy.

Every byte is relayed unchanged between client and server while both
directions are decoded and logged.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PGSNIFF_LISTEN_ADDR       - Listen address (e.g., 0.0.0.0:5434)
  PGSNIFF_UPSTREAM_ADDR     - PostgreSQL server (e.g., 127.0.0.1:5433)
  PGSNIFF_TLS               - Upstream negotiates TLS (true/false)
  PGSNIFF_BUFFER_SIZE       - Relay chunk size in bytes
  PGSNIFF_SHUTDOWN_TIMEOUT  - Graceful shutdown timeout (e.g., 10s)
  PGSNIFF_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
  PGSNIFF_PAYLOAD_FORMAT    - Payload rendering (text, hex, base64)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "pgsniff.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Address the proxy listens on
    #[arg(short, long, help = "Listen address (e.g., :5434 or 127.0.0.1:5434)")]
    pub listen: Option<String>,

    /// PostgreSQL server to dial for each client
    #[arg(short, long, help = "PostgreSQL server target (e.g., 127.0.0.1:5433)")]
    pub dial: Option<String>,

    /// Must be set whenever the server supports TLS connections
    #[arg(long, help = "Upstream server negotiates TLS")]
    pub tls: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// How message payloads are rendered
    #[arg(long, value_enum, help = "Payload rendering")]
    pub payload_format: Option<PayloadFormat>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = load_config(&args)?;
    init_tracing(&args, &config)?;

    info!("Starting pgsniff v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Listen address: {}", config.proxy.listen_addr);
        info!("  Upstream address: {}", config.proxy.upstream_addr);
        info!("  TLS: {}", config.proxy.tls);
        info!("  Max message size: {} bytes", config.decoder.max_message_size);
        info!("  Payload format: {:?}", config.logging.payload_format);
        return Ok(());
    }

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new().context("Failed to create metrics")?);

    let metrics_handle = match config.monitoring.metrics_addr {
        Some(addr) if config.monitoring.enabled => {
            let server = MetricsServer::bind(Arc::clone(&metrics), addr).await?;
            Some(tokio::spawn(async move {
                if let Err(e) = server.serve().await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        _ => None,
    };

    let events: Arc<dyn EventSink> = Arc::new(LogEventSink::from_config(&config));
    let engine = Arc::new(RelayEngine::from_config(&config, events, metrics));
    let manager = ConnectionManager::bind(Arc::clone(&config), engine).await?;
    let coordinator = ShutdownCoordinator::new(config.proxy.shutdown_timeout);

    let result = tokio::select! {
        result = manager.run() => result,
        signal = coordinator.listen_for_signals() => match signal {
            Ok(()) => {
                if let Err(e) = coordinator.shutdown_connection_manager(&manager).await {
                    warn!("Error during session cleanup: {}", e);
                }
                Ok(())
            }
            Err(e) => Err(e.context("Failed to install signal handlers")),
        },
    };

    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    match result {
        Ok(()) => {
            info!("Proxy shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Proxy stopped: {:#}", e);
            Err(e)
        }
    }
}

/// Load configuration: CLI args > config file > environment > defaults
fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = ConfigManager::load_from_file(&args.config)?;

    config.merge_with_cli_args(&CliOverrides {
        listen: args.listen.clone(),
        upstream: args.dial.clone(),
        tls: args.tls,
        payload_format: args.payload_format,
        log_level: args.log_level.clone(),
    })?;

    config
        .validate()
        .context("Final configuration validation failed")?;
    Ok(config)
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
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
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}
