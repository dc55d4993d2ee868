// src/core/tasks/connection_metrics.rs

use crate::connection::Registry;
use crate::core::metrics;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A task that periodically publishes the live connection count of every group.
pub struct ConnectionMetricsReporter {
    registry: Arc<Registry>,
    interval: Duration,
}

impl ConnectionMetricsReporter {
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Connection metrics reporter started. Interval: {:?}.", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        let mut reported: HashSet<String> = HashSet::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    reported = self.report(reported);
                }
                _ = shutdown_rx.recv() => {
                    info!("Connection metrics reporter shutting down.");
                    return;
                }
            }
        }
    }

    /// Sets the gauge for every current group and zeroes groups that emptied since
    /// the last report. Returns the groups reported this time.
    pub fn report(&self, previous: HashSet<String>) -> HashSet<String> {
        let counts = self.registry.total_connections_per_group();
        for (group, count) in &counts {
            metrics::CONNECTIONS_COUNT_CURRENT
                .with_label_values(&[group.as_str()])
                .set(*count as f64);
        }
        for group in previous.iter().filter(|g| !counts.contains_key(*g)) {
            metrics::CONNECTIONS_COUNT_CURRENT
                .with_label_values(&[group.as_str()])
                .set(0.0);
        }
        debug!("Reported connection counts for {} groups.", counts.len());
        counts.into_keys().collect()
    }
}
