// src/core/worker.rs

//! The publishing worker pool.
//!
//! A fixed number of workers drain the pipeline queue. Each worker bulk-publishes one
//! batch at a time and accounts for the call's immediate result. Asynchronous
//! confirmations are consumed by a companion task per worker. Confirmations carry no
//! batch context, so failures on that path are counted without a group.

use crate::core::collection::CollectRequest;
use crate::core::metrics;
use crate::core::pipeline::QueueReceiver;
use crate::core::publisher::{DeliveryReport, Producer};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Accounting for one published batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// One publishing worker and its confirmation channel.
pub struct Worker {
    name: String,
    producer: Arc<dyn Producer>,
    deliveries: mpsc::Sender<DeliveryReport>,
}

impl Worker {
    /// Creates a worker and spawns the task that drains its confirmation channel.
    pub fn spawn_with_drain(
        name: String,
        producer: Arc<dyn Producer>,
        delivery_channel_size: usize,
    ) -> Self {
        let (deliveries, delivery_rx) = mpsc::channel(delivery_channel_size.max(1));
        tokio::spawn(drain_deliveries(name.clone(), delivery_rx));
        Self {
            name,
            producer,
            deliveries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes one batch and records its latency and delivery metrics.
    pub async fn process(&self, request: CollectRequest) -> BatchOutcome {
        let worker = self.name.as_str();
        let group = request.identity.group.as_str();
        metrics::BATCH_IDLE_IN_CHANNEL_MILLISECONDS
            .with_label_values(&[worker])
            .observe(millis(request.time_pushed.elapsed()));

        let batch_read_time = Instant::now();
        let events = request.events();
        let batch_len = events.len();

        let failed = match self.producer.produce_bulk(events, &self.deliveries).await {
            Ok(()) => 0,
            Err(e) => {
                error!("[{}] Fail to publish batch {} for {}: {}", worker, request.req_guid(), request.identity, e);
                e.failed_count(batch_len)
            }
        };
        let delivered = batch_len.saturating_sub(failed);
        debug!("[{}] Success sending messages, {}", worker, delivered);

        if batch_len > 0 {
            let per_event = batch_len as f64;
            if let Some(sent) = request.sent_time() {
                let since_sent = SystemTime::now().duration_since(sent).unwrap_or_default();
                metrics::EVENT_PROCESSING_DURATION_MILLISECONDS
                    .with_label_values(&[group])
                    .observe(millis(since_sent) / per_event);
            }
            metrics::WORKER_PROCESSING_DURATION_MILLISECONDS
                .with_label_values(&[worker])
                .observe(millis(batch_read_time.elapsed()) / per_event);
            metrics::SERVER_PROCESSING_LATENCY_MILLISECONDS
                .with_label_values(&[group])
                .observe(millis(request.time_consumed.elapsed()) / per_event);
        }
        metrics::record_delivery(group, delivered, failed);

        BatchOutcome { delivered, failed }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Consumes confirmations until every sender is gone.
async fn drain_deliveries(worker: String, mut rx: mpsc::Receiver<DeliveryReport>) {
    while let Some(report) = rx.recv().await {
        if let Some(e) = report.error {
            error!("[{}] Fail to publish message to topic {}: {}", worker, report.topic, e);
            metrics::record_delivery("", 0, 1);
        }
    }
    debug!("[{}] Confirmation channel closed.", worker);
}

/// A fixed-size pool of publishing workers.
pub struct Pool {
    size: usize,
    delivery_channel_size: usize,
    queue: QueueReceiver,
    producer: Arc<dyn Producer>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl Pool {
    pub fn new(
        size: usize,
        delivery_channel_size: usize,
        queue: QueueReceiver,
        producer: Arc<dyn Producer>,
    ) -> Self {
        Self {
            size,
            delivery_channel_size,
            queue,
            producer,
            workers: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawns `size` workers. Calling it again is a no-op.
    pub fn start_workers(&self) {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            warn!("Worker pool already started.");
            return;
        }
        let mut set = JoinSet::new();
        for i in 0..self.size {
            let worker = Worker::spawn_with_drain(
                format!("worker-{i}"),
                self.producer.clone(),
                self.delivery_channel_size,
            );
            let queue = self.queue.clone();
            set.spawn(async move {
                info!("Running worker: {}", worker.name());
                while let Some(request) = queue.pop().await {
                    worker.process(request).await;
                }
                info!("Worker {} finished draining.", worker.name());
            });
        }
        *workers = Some(set);
    }

    /// Closes the queue and waits up to `timeout` for the workers to publish what is
    /// already queued or in flight.
    ///
    /// Returns `true` if the timeout elapsed first. Workers are never aborted: the
    /// timeout only bounds how long the caller waits.
    pub async fn flush_with_timeout(&self, timeout: Duration) -> bool {
        self.queue.close();
        let Some(mut set) = self.workers.lock().take() else {
            return false;
        };
        let drained = tokio::time::timeout(timeout, async {
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    error!("A publishing worker panicked: {e:?}");
                }
            }
        })
        .await;
        match drained {
            Ok(()) => false,
            Err(_) => {
                set.detach_all();
                true
            }
        }
    }
}
