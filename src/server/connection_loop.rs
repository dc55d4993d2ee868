// src/server/connection_loop.rs

//! Serves the HTTP surface until a shutdown signal arrives, then drains the
//! pipeline in order: connections, queued batches, the broker client.

use super::context::{LogReloadHandle, ServerContext};
use super::routes;
use crate::config::Config;
use crate::connection::Registry;
use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

const BACKGROUND_TASKS_TIMEOUT: Duration = Duration::from_secs(10);

/// The main server loop that serves requests and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

    let stop_accepting = CancellationToken::new();
    let app = routes::router(ctx.app_state.clone());
    let serve = axum::serve(ctx.listener, app)
        .with_graceful_shutdown(stop_accepting.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { serve.await });

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = sighup.recv() => {
                reload_log_level(ctx.config_path.as_deref(), &ctx.log_reload_handle);
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => {
                        error!("CRITICAL: Background task failed: {}. Shutting down.", e);
                        outcome = Err(e);
                        break;
                    }
                    Err(e) => {
                        error!("CRITICAL: Background task panicked: {e:?}. Shutting down.");
                        outcome = Err(anyhow!("background task panicked: {e}"));
                        break;
                    }
                }
            },

            res = &mut server => {
                error!("CRITICAL: HTTP server stopped unexpectedly: {res:?}. Shutting down.");
                outcome = Err(anyhow!("HTTP server stopped unexpectedly"));
                break;
            }
        }
    }

    info!("Shutting down. No longer accepting connections.");
    stop_accepting.cancel();
    ctx.connections_shutdown.cancel();
    wait_for_connections(&ctx.registry, ctx.config.websocket.write_wait_interval).await;

    info!("Flushing queued batches to the publishing workers...");
    if ctx.pool.flush_with_timeout(ctx.config.worker.flush_timeout).await {
        warn!(
            "Timed out after {:?} waiting for workers; batches still queued or in flight may be lost.",
            ctx.config.worker.flush_timeout
        );
    } else {
        info!("All queued batches have been handed to the publisher.");
    }

    let outstanding = ctx.producer.flush(ctx.config.publisher.flush_timeout).await;
    if outstanding > 0 {
        warn!("{} messages were still undelivered when the publisher flush timed out.", outstanding);
    }
    ctx.producer.close().await;
    info!("Publisher closed.");

    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No background task was listening for the shutdown signal.");
    }
    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_TASKS_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };

    if !server.is_finished() {
        server.abort();
    }
    info!("Server shutdown complete.");
    outcome
}

/// Waits, at most one write deadline, for every handler to leave the registry.
async fn wait_for_connections(registry: &Registry, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while !registry.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "{} connections were still open after the close deadline.",
                registry.len()
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("All client connections closed.");
}

fn reload_log_level(config_path: Option<&str>, handle: &LogReloadHandle) {
    let Some(path) = config_path else {
        warn!("SIGHUP received but the server was started without a config file.");
        return;
    };
    match Config::from_file(path) {
        Ok(config) => {
            match handle.modify(|filter| *filter = EnvFilter::new(&config.log_level)) {
                Ok(()) => info!("Log level reloaded to '{}'.", config.log_level),
                Err(e) => error!("Failed to apply new log level: {}", e),
            }
        }
        Err(e) => error!("SIGHUP: could not reload configuration: {:#}", e),
    }
}
