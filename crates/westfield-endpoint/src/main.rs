//! Westfield endpoint daemon
//!
//! Main entry point for westfield-endpoint.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use westfield_endpoint::config_file::DEFAULT_CONFIG_PATH;
use westfield_endpoint::{Endpoint, EndpointConfig, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "westfield-endpoint", version, about = "Westfield endpoint daemon")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen on this socket name instead of the first free automatic one
    #[arg(long)]
    socket: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = EndpointConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(socket) = args.socket {
        config.endpoint.socket_name = Some(socket);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.json = true;
    }
    config.validate()?;

    init_logging(&config.logging)?;
    info!("westfield-endpoint: Starting");

    let endpoint = Endpoint::new(&config).context("starting display")?;
    info!(socket = %endpoint.socket_name(), "westfield-endpoint: Listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "westfield-endpoint: Cannot wait for ctrl-c");
            return;
        }
        info!("westfield-endpoint: Received shutdown signal");
    };

    match endpoint.run(shutdown).await {
        Ok(()) => {
            info!("westfield-endpoint: Exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "westfield-endpoint: Exiting with error");
            Err(e.into())
        }
    }
}

/// Initialize structured logging. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.to_ascii_lowercase()))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    result.map_err(|e| anyhow!("Failed to set logger: {e}"))
}
