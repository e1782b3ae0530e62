//! SocksBridge - SOCKS4/SOCKS5 proxy engine
//!
//! Accepts SOCKS4, SOCKS4a and SOCKS5 CONNECT requests, optionally behind
//! username/password authentication, and relays traffic to the target
//! either directly or through a chain of upstream SOCKS proxies.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use socksbridge::{config::ConfigManager, Server, ShutdownCoordinator};

/// CLI arguments for SocksBridge
#[derive(Parser, Debug)]
#[command(name = "socksbridge")]
#[command(about = "SocksBridge - SOCKS4/SOCKS5 proxy engine")]
#[command(version)]
#[command(long_about = "
SocksBridge - SOCKS4/SOCKS5 proxy engine

Accepts SOCKS4, SOCKS4a and SOCKS5 CONNECT requests, optionally behind
username/password authentication, and relays traffic to the target either
directly or through a chain of upstream SOCKS proxies. A keyed payload
transform can obfuscate the leg between an entry and an exit instance.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  SOCKSBRIDGE_BIND_ADDR       - Bind address (e.g., 127.0.0.1:1080)
  SOCKSBRIDGE_ROLE            - Relay role (entry or exit)
  SOCKSBRIDGE_BUFFER_SIZE     - Relay buffer size in bytes
  SOCKSBRIDGE_CONNECT_TIMEOUT - Upstream connect timeout (e.g., 30s)
  SOCKSBRIDGE_GRACE_TIMEOUT   - Close-drain timeout (e.g., 3s)
  SOCKSBRIDGE_AUTH_ENABLED    - Enable authentication (true/false)
  SOCKSBRIDGE_CHAIN           - Comma-separated upstream proxy URIs
  SOCKSBRIDGE_TRANSFORM_KEY   - Payload transform key (enables transform)
  SOCKSBRIDGE_LOG_LEVEL       - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:1080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Relay role (overrides config file)
    #[arg(long, help = "Relay role: entry or exit")]
    pub role: Option<String>,

    /// Upstream proxy chain (overrides config file)
    #[arg(long = "chain", help = "Upstream proxy URI, repeat to chain hops in order")]
    pub chain: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Disable authentication (overrides config file)
    #[arg(long, help = "Disable authentication")]
    pub no_auth: bool,

    /// Relay buffer size in bytes
    #[arg(long, help = "Relay buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting SocksBridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.role.as_deref(),
        &args.chain,
        args.no_auth,
        args.buffer_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Relay role: {}", config.server.role);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!("  Connect timeout: {:?}", config.server.connect_timeout);
        info!(
            "  Authentication: {}",
            if config.auth.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        info!("  Proxy chain: {} hop(s)", config.chain.proxies.len());
        info!(
            "  Transform: {}",
            if config.transform.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!("Bind address: {}", config.server.bind_addr);
    info!("Relay role: {}", config.server.role);
    info!(
        "Authentication: {}",
        if config.auth.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let shutdown_timeout = config.server.shutdown_timeout;
    let server = Arc::new(Server::new(Arc::new(config))?);
    let shutdown_coordinator = ShutdownCoordinator::new(server.shutdown_handle(), shutdown_timeout);

    // Run the accept loop in its own task; main waits on signals
    let mut server_task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    info!("SocksBridge started successfully");
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    tokio::select! {
        signal_result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = signal_result {
                error!("Error setting up signal handlers: {}", e);
            }
            info!("Initiating graceful shutdown...");
        }
        join_result = &mut server_task => {
            return match join_result {
                Ok(Ok(())) => {
                    warn!("Server stopped before any shutdown signal");
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(e) => {
                    error!("Server task failed: {}", e);
                    Ok(())
                }
            };
        }
    }

    // The broadcast already stopped the accept loop; wait for it to wind down
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error during shutdown: {:#}", e),
        Err(e) => error!("Server task failed: {}", e),
    }

    shutdown_coordinator.wait_for_drain(&server).await;

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
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
