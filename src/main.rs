//! Gateway dispatch core (server binary).
//!
//! ```text
//!     Client ──▶ proxy listener ──▶ dispatcher ──▶ route table
//!                                       │
//!                      circuit breaker ◀┤
//!                                       ▼
//!                                 load balancer ◀── registry ◀── store (memory | redis)
//!                                       │              ▲
//!     Client ◀── gateway headers ◀──────┘              └── health prober
//!
//!     Operator ──▶ admin listener ──▶ routes / health / metrics / breakers
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use dispatch_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use dispatch_gateway::lifecycle::{signals::wait_for_signal, BackgroundTasks, Shutdown};
use dispatch_gateway::observability::{init_logging, metrics};
use dispatch_gateway::{Gateway, HttpServer};

#[derive(Parser)]
#[command(name = "dispatch-gateway", version, about = "API gateway dispatch core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Reload routes when the configuration file changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let config = if config_found {
        load_config(&cli.config)?
    } else {
        GatewayConfig::default()
    };

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dispatch-gateway starting");
    if !config_found {
        tracing::warn!(path = ?cli.config, "Config file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        proxy = %config.listener.bind_address,
        admin = %config.admin.bind_address,
        admin_enabled = config.admin.enabled,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    let gateway = Arc::new(Gateway::build(config).await?);
    let shutdown = Arc::new(Shutdown::new());
    let tasks = BackgroundTasks::start(&gateway, &shutdown);

    // The notify watcher stops when dropped; keep it for the process lifetime.
    let _watcher = if cli.watch && config_found {
        let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
        let handle = watcher.run()?;
        let gw = gateway.clone();
        tokio::spawn(async move {
            while let Some(next) = updates.recv().await {
                if let Err(e) = gw.apply_config(&next) {
                    tracing::error!(error = %e, "Config reload rejected, keeping current routes");
                }
            }
        });
        Some(handle)
    } else {
        if cli.watch {
            tracing::warn!("--watch ignored without a config file");
        }
        None
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal = signal, "Signal received, shutting down");
        signal_shutdown.trigger();
    });

    HttpServer::new(gateway).run(&shutdown).await?;
    tasks.stop(&shutdown).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
