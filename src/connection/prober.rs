// src/connection/prober.rs

//! The liveness prober: pings every admitted connection on a fixed interval and
//! evicts the ones that cannot take a ping within the write deadline.

use super::conn::Connection;
use super::registry::Registry;
use crate::core::metrics;
use futures::future::join_all;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Creates the intake queue through which handlers admit new connections to the
/// probe set. Size it to the connection ceiling so admission never waits.
pub fn intake_channel(
    capacity: usize,
) -> (mpsc::Sender<Arc<Connection>>, mpsc::Receiver<Arc<Connection>>) {
    mpsc::channel(capacity.max(1))
}

/// A task responsible for detecting dead peers.
pub struct Prober {
    registry: Arc<Registry>,
    intake: mpsc::Receiver<Arc<Connection>>,
    ping_interval: Duration,
    probe_set: Vec<Weak<Connection>>,
}

impl Prober {
    pub fn new(
        registry: Arc<Registry>,
        intake: mpsc::Receiver<Arc<Connection>>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            registry,
            intake,
            ping_interval,
            probe_set: Vec::new(),
        }
    }

    /// Runs until shutdown. The probe set holds weak references only, so a
    /// connection whose handler has exited simply drops out.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Liveness prober started. Ping interval: {:?}.",
            self.ping_interval
        );
        let mut interval = tokio::time::interval(self.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                Some(conn) = self.intake.recv() => {
                    debug!("Admitting {} to the probe set.", conn.identity());
                    self.probe_set.push(Arc::downgrade(&conn));
                }
                _ = interval.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Liveness prober shutting down.");
                    return;
                }
            }
        }
    }

    /// Pings every live connection once, concurrently, and evicts the failures.
    pub async fn probe_all(&mut self) -> usize {
        self.probe_set
            .retain(|weak| weak.upgrade().is_some_and(|conn| !conn.is_closed()));
        let live: Vec<Arc<Connection>> = self.probe_set.iter().filter_map(Weak::upgrade).collect();

        let results = join_all(live.iter().map(|conn| conn.ping())).await;

        let mut evicted = 0;
        for (conn, result) in live.iter().zip(results) {
            if let Err(e) = result {
                let identity = conn.identity();
                warn!("Ping to {} failed, evicting connection: {}", identity, e);
                metrics::SERVER_PING_FAILURE_TOTAL
                    .with_label_values(&[identity.group.as_str()])
                    .inc();
                self.registry.unregister(conn);
                conn.close(None).await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.probe_set
                .retain(|weak| weak.upgrade().is_some_and(|conn| !conn.is_closed()));
        }
        debug!("Probed {} connections, evicted {}.", live.len(), evicted);
        evicted
    }

    /// Drains pending admissions without waiting. Used before a manual probe.
    pub fn admit_pending(&mut self) {
        while let Ok(conn) = self.intake.try_recv() {
            self.probe_set.push(Arc::downgrade(&conn));
        }
    }

    pub fn probe_set_len(&self) -> usize {
        self.probe_set.iter().filter(|w| w.strong_count() > 0).count()
    }
}
