//! Gatehouse server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ─────────────────▶ http server ──▶ firewall middleware ──▶ dispatcher
//!                                                                   │
//!                           ┌───────────────────────────────────────┘
//!                           ▼
//!       FirewallMap (first match) ──▶ listeners, in order:
//!           channel → login throttling → authenticators
//!           → remember-me → access decision → logout
//!                           │
//!            ┌──────────────┴──────────────┐
//!            ▼                             ▼
//!     terminal response              handler runs with
//!     (redirect / 401 / 403 / 429)   SecurityContext
//!
//!     Cross-cutting: config (TOML, hot reload), observability
//!     (tracing + Prometheus), lifecycle (signals, graceful shutdown)
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use gatehouse::config::load_config;
use gatehouse::config::watcher::ConfigWatcher;
use gatehouse::http::HttpServer;
use gatehouse::lifecycle::{wait_for_shutdown, Shutdown};
use gatehouse::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "gatehouse")]
#[command(about = "Authentication and authorization gateway", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gatehouse.toml")]
    config: PathBuf,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    if cli.check {
        println!("{}: configuration is valid", cli.config.display());
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatehouse starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        firewalls = config.firewalls.len(),
        access_rules = config.access_control.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config)?;
    let shutdown = Shutdown::new();

    // Dropping the watcher stops it, so it lives until main returns.
    let _watcher = if cli.no_watch {
        None
    } else {
        let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
        let state = server.state().clone();
        let stop = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = Shutdown::triggered(stop) => {}
                _ = async {
                    while let Some(config) = updates.recv().await {
                        if let Err(e) = state.reload(config) {
                            tracing::error!(error = %e, "Rejected configuration, keeping current one");
                        }
                    }
                } => {}
            }
        });
        Some(watcher.run()?)
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        signal_shutdown.trigger();
    });

    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
