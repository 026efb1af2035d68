//! dexpulse - market-data polling and transaction-finalization engine
//!
//! Keeps DEX market data (chains/tokens/pools) fresh for front-end consumers
//! without redundant network traffic, and monitors submitted transactions to
//! finalization, publishing typed events for downstream stores.

use anyhow::Result;
use futures::FutureExt;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod backend;
mod cache;
mod config;
mod error;
mod events;
mod metrics;
mod monitor;
mod sched;
mod store;
mod topics;

use backend::BackendClient;
use cache::RequestCache;
use config::Settings;
use events::EventBus;
use metrics::MetricsServer;
use monitor::TxMonitor;
use sched::{IntervalScheduler, TaskConfig, VisibilitySignal};
use store::MarketStore;
use topics::TopicRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting dexpulse v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!("Loaded configuration for instance {}", settings.engine.instance_id);

    // Core components: every piece is an explicit instance, shared by Arc
    let visibility = Arc::new(VisibilitySignal::new(settings.engine.start_hidden));
    let scheduler = Arc::new(IntervalScheduler::new(visibility.clone()));
    let bus = EventBus::new(settings.engine.event_bus_capacity);
    let store = Arc::new(MarketStore::new());
    let cache = Arc::new(RequestCache::new());

    let backend = Arc::new(BackendClient::new(&settings.backend)?);
    info!("Backend client ready for {}", settings.backend.base_url);

    let registry = Arc::new(TopicRegistry::new(
        scheduler.clone(),
        cache,
        backend.clone(),
        store.clone(),
        bus.clone(),
        settings.topic_cadences(),
    ));

    let monitor = Arc::new(TxMonitor::new(
        backend,
        bus.clone(),
        settings.engine.tx_max_polls,
    ));

    // The monitor's shared ticker runs as a scheduler task; it keeps its
    // period while hidden (pending transactions matter in the background)
    let ticker_interval =
        tokio::time::Duration::from_millis(settings.engine.tx_poll_interval_ms);
    scheduler
        .register(
            "tx-monitor",
            Arc::new({
                let monitor = monitor.clone();
                move || {
                    let monitor = monitor.clone();
                    async move { monitor.tick().await }.boxed()
                }
            }),
            TaskConfig {
                active_interval: ticker_interval,
                background_interval: ticker_interval,
                pause_on_hidden: false,
            },
        )
        .await;
    info!("Transaction monitor ticker registered");

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let state = api::AppState {
            registry: registry.clone(),
            monitor: monitor.clone(),
            store: store.clone(),
            visibility: visibility.clone(),
        };
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("dexpulse is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown: stop all pollers, then drop the servers
    scheduler.shutdown().await;
    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("dexpulse stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dexpulse=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
