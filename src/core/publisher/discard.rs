// src/core/publisher/discard.rs

use super::{DeliveryReport, Producer, ProducerError, PublishError};
use crate::core::protocol::Event;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// A producer that accepts and immediately confirms every message without sending
/// it anywhere. Used to run the server without a broker.
#[derive(Debug, Default)]
pub struct DiscardProducer {
    accepted: AtomicU64,
    closed: AtomicBool,
}

impl DiscardProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of messages accepted since startup.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Producer for DiscardProducer {
    async fn produce_bulk(
        &self,
        events: &[Event],
        deliveries: &mpsc::Sender<DeliveryReport>,
    ) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Rejected(ProducerError::Closed));
        }
        for event in events {
            trace!(
                "Discarding {} byte event of type '{}'.",
                event.event_bytes.len(),
                event.r#type
            );
            self.accepted.fetch_add(1, Ordering::Relaxed);
            // The drain task may already be gone during shutdown.
            let _ = deliveries
                .send(DeliveryReport::delivered(event.r#type.clone()))
                .await;
        }
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> usize {
        0
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
