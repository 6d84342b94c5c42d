//! Stagehand
//!
//! Loads plugins and rules, then turns platform events into actions until
//! interrupted.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use stagehand::config::{Config, LoggingConfig, Overrides};
use stagehand::Host;

/// Event-driven automation host
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(about = "Event-driven automation host", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./stagehand.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rules directory
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Plugins directory
    #[arg(short, long)]
    plugins: Option<PathBuf>,

    /// Don't reload rules when files change
    #[arg(long)]
    no_watch: bool,

    /// Log filter directives (overridden by RUST_LOG)
    #[arg(long)]
    log: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            rules_dir: self.rules.clone(),
            plugins_dir: self.plugins.clone(),
            no_watch: self.no_watch,
            log_filter: self.log.clone(),
            json_logs: self.json_logs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?.with_overrides(&args.overrides());

    init_tracing(&config.logging);
    info!("Starting Stagehand v{}", env!("CARGO_PKG_VERSION"));

    let host = Host::start(config).await?;

    // Log plugin status
    let plugins = host.plugin_status();
    if plugins.is_empty() {
        info!("No plugins loaded");
    } else {
        info!("Plugins:");
        for plugin in plugins {
            match plugin.error {
                Some(error) => warn!("  - {} v{} ({}): {}", plugin.name, plugin.version, plugin.state, error),
                None => info!("  - {} v{} ({})", plugin.name, plugin.version, plugin.state),
            }
        }
    }
    info!(
        rules = host.store().snapshot().len(),
        actions = host.actions().len(),
        "Ready"
    );

    shutdown_signal().await;

    host.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
