//! framerelay command line
//!
//! `serve` runs the relay, `send` runs the standalone client.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use framerelay::{
    config::{ConfigManager, ConfigOverrides},
    logging,
    metrics::{Metrics, MonitoringServer},
    Broker, Config, FrameClient, ShutdownCoordinator,
};

#[derive(Parser, Debug)]
#[command(name = "framerelay")]
#[command(about = "Transparent TCP relay for length-prefixed frames")]
#[command(version)]
#[command(long_about = "
Transparent TCP relay for length-prefixed frames.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  FRAMERELAY_HOST              - Listen host
  FRAMERELAY_PORT              - Listen port
  FRAMERELAY_TARGET_HOST       - Upstream host
  FRAMERELAY_TARGET_PORT       - Upstream port
  FRAMERELAY_CONNECT_TIMEOUT   - Upstream connect timeout (e.g., 5s)
  FRAMERELAY_MAX_FRAME_LENGTH  - Largest accepted payload in bytes
  FRAMERELAY_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay
    Serve(ServeArgs),
    /// Send frames with the standalone client
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    config: PathBuf,

    #[arg(long, help = "Listen host")]
    host: Option<String>,

    #[arg(short, long, help = "Listen port")]
    port: Option<u16>,

    #[arg(long, help = "Upstream host")]
    target_host: Option<String>,

    #[arg(long, help = "Upstream port")]
    target_port: Option<u16>,

    #[arg(long, help = "Largest accepted payload in bytes")]
    max_frame_length: Option<u32>,

    #[arg(long, help = "Log level")]
    log_level: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(long, help = "Validate configuration and exit")]
    validate_config: bool,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = framerelay::protocol::DEFAULT_LISTEN_PORT)]
    port: u16,

    #[arg(short = 't', long, default_value_t = 1, help = "Frame type of the request")]
    frame_type: u16,

    #[arg(long, default_value = "", help = "Request payload as text")]
    payload: String,

    #[arg(short = 'n', long, default_value_t = 1, help = "Number of requests to send")]
    count: u32,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Send(args) => send(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(&ConfigOverrides {
        host: args.host,
        port: args.port,
        target_host: args.target_host,
        target_port: args.target_port,
        max_frame_length: args.max_frame_length,
        log_level: args.log_level,
    });

    config
        .validate()
        .context("Final configuration validation failed")?;

    let _log_guard = logging::init_tracing(&config.logging, args.verbose)?;

    if args.validate_config {
        info!("Configuration is valid");
        log_summary(&config);
        return Ok(());
    }

    info!("Starting framerelay v{}", env!("CARGO_PKG_VERSION"));
    log_summary(&config);

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());
    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    let mut broker = Broker::new(config.clone(), metrics.clone());
    broker.bind().await?;
    let broker_handle = broker.handle();

    let monitoring_handle = if config.monitoring.enabled {
        let server = MonitoringServer::new(
            config.monitoring.bind_addr,
            metrics.clone(),
            broker.registry().clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Monitoring server error: {}", e);
            }
        }))
    } else {
        None
    };

    let mut server_handle = tokio::spawn(async move { broker.start().await });

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    let mut broker_finished = false;
    tokio::select! {
        result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
            }
        }
        result = &mut server_handle => {
            // Accept loop ended on its own; still drain whatever sessions exist
            broker_finished = true;
            match result {
                Ok(Err(e)) => error!("Broker error: {}", e),
                Err(e) => error!("Broker task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    info!(
        "Initiating graceful shutdown (timeout: {:?})...",
        shutdown_coordinator.timeout()
    );
    if let Err(e) = shutdown_coordinator.shutdown_broker(&broker_handle).await {
        error!("Error during session cleanup: {}", e);
    }

    if !broker_finished {
        match server_handle.await {
            Ok(Err(e)) => error!("Broker error: {}", e),
            Err(e) => error!("Broker task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    if let Some(handle) = monitoring_handle {
        handle.abort();
        info!("Monitoring server shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn send(args: SendArgs) -> Result<()> {
    let logging_config = framerelay::config::LoggingConfig::default();
    let _log_guard = logging::init_tracing(&logging_config, args.verbose)?;

    let mut client = FrameClient::new(args.host, args.port);
    client.connect().await?;

    for _ in 0..args.count {
        match client.send_request(args.frame_type, args.payload.as_bytes()).await {
            Ok((frame_type, payload)) => {
                println!(
                    "0x{:04X} {}",
                    frame_type,
                    String::from_utf8_lossy(&payload)
                );
            }
            Err(e) => {
                client.disconnect().await;
                return Err(e).context("Request failed");
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn log_summary(config: &Config) {
    info!("Configuration summary:");
    info!("  Listen address: {}", config.listen_address());
    info!("  Target address: {}", config.target_address());
    info!("  Connect timeout: {:?}", config.upstream.connect_timeout);
    info!("  Max frame length: {} bytes", config.limits.max_frame_length);
    info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
    info!(
        "  Monitoring: {}",
        if config.monitoring.enabled {
            format!("enabled on {}", config.monitoring.bind_addr)
        } else {
            "disabled".to_string()
        }
    );
}
