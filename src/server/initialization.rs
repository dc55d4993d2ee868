// src/server/initialization.rs

//! Builds every server component, from the connection registry to the publishing
//! pool, and binds the listener.

use super::context::{LogReloadHandle, ServerContext};
use super::routes::AppState;
use crate::config::{Config, PublisherKind};
use crate::connection::{IngestionHandler, Prober, Registry, Upgrader, prober};
use crate::core::collection::Collector;
use crate::core::pipeline;
use crate::core::publisher::{DiscardProducer, Producer};
use crate::core::worker::Pool;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    config_path: Option<String>,
    log_reload_handle: LogReloadHandle,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);
    let connections_shutdown = CancellationToken::new();

    let producer = build_producer(&config)?;

    let (queue_tx, queue_rx) = pipeline::channel(config.worker.delivery_queue_size);
    let pool = Arc::new(Pool::new(
        config.worker.pool_size,
        config.worker.delivery_channel_size,
        queue_rx,
        producer.clone(),
    ));
    let collector = Collector::new(queue_tx, config.collector.wait_timeout());

    let registry = Arc::new(Registry::new(config.websocket.max_connections));
    let (intake_tx, intake_rx) = prober::intake_channel(config.websocket.max_connections);
    let prober = Prober::new(registry.clone(), intake_rx, config.websocket.ping_interval);
    let upgrader = Upgrader::new(
        config.websocket.clone(),
        registry.clone(),
        intake_tx,
        connections_shutdown.clone(),
    );
    let handler = IngestionHandler::new(collector.clone(), registry.clone());
    let app_state = AppState::new(upgrader, handler, collector, connections_shutdown.clone());
    info!("Ingestion pipeline initialized.");

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("EventGate server listening on {}:{}", config.host, config.port);

    Ok(ServerContext {
        config,
        config_path,
        log_reload_handle,
        registry,
        pool,
        producer,
        app_state,
        prober: Some(prober),
        listener,
        shutdown_tx,
        connections_shutdown,
        background_tasks: JoinSet::new(),
    })
}

/// Creates the broker client selected by `publisher.kind`.
pub fn build_producer(config: &Config) -> Result<Arc<dyn Producer>> {
    match config.publisher.kind {
        PublisherKind::Discard => {
            warn!("Publisher kind is 'discard': accepted events are confirmed and dropped.");
            Ok(Arc::new(DiscardProducer::new()))
        }
        #[cfg(feature = "kafka")]
        PublisherKind::Kafka => {
            let producer = crate::core::publisher::KafkaProducer::new(&config.publisher.kafka)
                .context("Failed to create Kafka producer")?;
            info!("Kafka producer connected to {}.", config.publisher.kafka.brokers);
            Ok(Arc::new(producer))
        }
        #[cfg(not(feature = "kafka"))]
        PublisherKind::Kafka => Err(anyhow::anyhow!(
            "publisher.kind is 'kafka' but this build does not include the `kafka` feature"
        )),
    }
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Connection ceiling: {}. Ping interval: {:?}, pong wait: {:?}, write wait: {:?}.",
        config.websocket.max_connections,
        config.websocket.ping_interval,
        config.websocket.pong_wait_interval,
        config.websocket.write_wait_interval
    );
    info!(
        "Worker pool: {} workers, queue capacity {}, confirmation channel {}.",
        config.worker.pool_size, config.worker.delivery_queue_size, config.worker.delivery_channel_size
    );
    match config.collector.wait_timeout() {
        Some(limit) => info!("Collector rejects batches that wait longer than {:?} for queue space.", limit),
        None => info!("Collector blocks until queue space is available."),
    }
}
