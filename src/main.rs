mod api;
mod config;
mod data;
mod errors;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use log::{info, error, warn};

use crate::api::{create_router, ApiState};
use crate::config::{Config, FETCH_TIMEOUT_SECS, SHUTDOWN_GRACE_SECS, SUBSCRIBER_QUEUE_CAPACITY};
use crate::data::{CoinDeskFetcher, HistoryBuffer, PriceBroadcaster, SubscriberRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    // Initialize logger
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(log_level));

    let config = match config.and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            return Err(e.into());
        }
    };
    config.log_config();

    // Initialize shared components
    let registry = Arc::new(SubscriberRegistry::new(SUBSCRIBER_QUEUE_CAPACITY));
    let history = Arc::new(HistoryBuffer::new(config.history_capacity(), config.history_retention));
    info!("History buffer holds {} samples for {:?}", history.capacity(), history.ttl());
    let fetcher = CoinDeskFetcher::new(
        &config.api_key,
        &config.api_url,
        &config.instrument,
        Duration::from_secs(FETCH_TIMEOUT_SECS),
    )?;

    let broadcaster = PriceBroadcaster::new(
        fetcher,
        history.clone(),
        registry.clone(),
        config.sample_interval,
    );
    let broadcast_task = tokio::spawn(broadcaster.run());

    let state = ApiState {
        registry: registry.clone(),
        history,
    };
    let router = create_router(state, &config.frontend_dir);

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Frontend available at http://{}/", config.bind_address);
    info!("SSE stream available at http://{}/stream", config.bind_address);

    let grace_started = Arc::new(Notify::new());
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(broadcast_task, registry, grace_started.clone()));

    let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
    tokio::select! {
        result = server.into_future() => {
            result?;
            info!("Server exited gracefully");
        }
        _ = async {
            grace_started.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("Server forced to shutdown after {:?} grace period", grace);
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C after stopping the producer and closing every
/// subscriber queue, so open streams finish on their own.
async fn shutdown_signal(
    broadcast_task: JoinHandle<()>,
    registry: Arc<SubscriberRegistry>,
    grace_started: Arc<Notify>,
) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    info!("Shutting down server...");
    broadcast_task.abort();
    registry.close_all();
    grace_started.notify_one();
}
