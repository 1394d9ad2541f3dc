//! Ingest service entry point.
//!
//! Consumes sensor readings from NATS, stores them in SQLite and streams
//! them to WebSocket clients.

use anyhow::Result;
use ingest_service::{
    create_router, AppState, Broadcaster, Config, ConsumerConfig, NatsBroker, Pipeline,
    SensorConsumer,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use storage::{SqliteStore, Store};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting ingest service");

    let config = Config::from_env()?;
    config.log_summary();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let store = SqliteStore::open(&config.database_path)?;
    store.initialize(&config.table).await?;
    let store: Arc<dyn Store> = Arc::new(store);

    let broadcaster = Arc::new(Broadcaster::new());
    let pipeline = Arc::new(Pipeline::new(store, broadcaster, config.table.clone()));

    // An unreachable broker at startup is fatal; later losses are retried.
    let broker = NatsBroker::connect(&config.nats_url, config.queue_durable).await?;

    let consumer = SensorConsumer::new(
        broker,
        pipeline.clone(),
        ConsumerConfig::for_queue(config.queue.clone()),
    );
    let consumer_state = consumer.state();

    let shutdown = CancellationToken::new();
    let consumer_handle = tokio::spawn(consumer.run(shutdown.clone()));

    let state = Arc::new(AppState {
        pipeline,
        consumer_state,
    });
    let app = create_router(state, config.cors_layer()?);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Ingest service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down consumer...");
    shutdown.cancel();
    if let Err(e) = consumer_handle.await {
        warn!("Consumer task ended abnormally: {}", e);
    }

    info!("Ingest service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
