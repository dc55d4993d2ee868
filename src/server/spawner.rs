// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::tasks::connection_metrics::ConnectionMetricsReporter;
use anyhow::{Result, anyhow};
use tracing::info;

/// Starts the publishing workers and spawns every background task into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Publishing Workers ---
    ctx.pool.start_workers();
    info!("Started {} publishing workers.", ctx.pool.size());

    // --- Liveness Prober ---
    let prober = ctx
        .prober
        .take()
        .ok_or_else(|| anyhow!("Liveness prober was already spawned"))?;
    let shutdown_rx_prober = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        prober.run(shutdown_rx_prober).await;
        Ok(())
    });

    // --- Metrics ---
    if ctx.config.metrics.enabled {
        let reporter =
            ConnectionMetricsReporter::new(ctx.registry.clone(), ctx.config.metrics.report_interval);
        let shutdown_rx_report = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            reporter.run(shutdown_rx_report).await;
            Ok(())
        });

        let port = ctx.config.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(port, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
