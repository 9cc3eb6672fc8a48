use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sluice::config::{LoggingConfig, SluiceConfig};
use sluice::http::{HttpServer, RateLimitState};
use sluice::ratelimit::{spawn_sweeper, RateDecider};

/// Sliding-window rate limiting HTTP service.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    // Config decides the subscriber, so nothing may log before this.
    init_tracing(&config.logging);

    info!("Starting Sluice Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded from file"),
        None => info!("Configuration loaded from environment"),
    }
    info!(http_addr = %config.server.http_addr, "Listen address resolved");

    // Fail fast on an unusable policy
    let policy = config.rate_limiting.policy()?;
    let decider = Arc::new(RateDecider::new(policy));
    info!(
        limit = policy.limit(),
        window = ?policy.window(),
        "Rate decider initialized"
    );

    let sweeper = config
        .rate_limiting
        .sweep_interval()
        .map(|every| spawn_sweeper(decider.clone(), every));

    let state = RateLimitState::new(decider, config.rate_limiting.on_storage_error);
    let server = HttpServer::new(config.server.http_addr, state);

    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }

    info!("Sluice Rate Limiting Service stopped");
    Ok(())
}

/// Load configuration and apply command line overrides.
fn resolve_config(args: &Args) -> sluice::error::Result<SluiceConfig> {
    let mut config = match &args.config {
        Some(path) => SluiceConfig::from_file(path)?,
        None => SluiceConfig::from_env()?,
    };
    if let Some(addr) = args.listen {
        config.server.http_addr = addr;
    }
    if args.json_logs {
        config.logging.json = true;
    }
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
