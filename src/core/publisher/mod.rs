// src/core/publisher/mod.rs

//! The broker client boundary.
//!
//! A bulk publish has two outcomes. The call's return value reports, position by
//! position, which messages the client refused to accept. Messages it did accept
//! are confirmed later, one `DeliveryReport` each, on the confirmation channel the
//! caller passed in.

use crate::core::protocol::Event;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

mod discard;
#[cfg(feature = "kafka")]
mod kafka;

pub use discard::DiscardProducer;
#[cfg(feature = "kafka")]
pub use kafka::KafkaProducer;

/// Why a single message was not accepted or not delivered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProducerError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("producer queue is full")]
    QueueFull,

    #[error("producer is closed")]
    Closed,

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("broker client error: {0}")]
    Client(String),
}

/// The asynchronous confirmation for one accepted message.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub topic: String,
    pub error: Option<ProducerError>,
}

impl DeliveryReport {
    pub fn delivered(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            error: None,
        }
    }

    pub fn failed(topic: impl Into<String>, error: ProducerError) -> Self {
        Self {
            topic: topic.into(),
            error: Some(error),
        }
    }
}

/// Per-message errors of one bulk publish, positionally aligned with the batch:
/// entry `i` is `None` when event `i` was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkPublishError {
    errors: Vec<Option<ProducerError>>,
}

impl BulkPublishError {
    /// Turns the per-position results of a `batch_len` batch into the bulk publish
    /// result. The error always holds exactly `batch_len` entries: surplus entries
    /// are dropped and positions without a result count as failed.
    pub fn check(
        batch_len: usize,
        mut errors: Vec<Option<ProducerError>>,
    ) -> Result<(), PublishError> {
        if errors.len() != batch_len {
            warn!(
                "Bulk publish returned {} results for a batch of {}.",
                errors.len(),
                batch_len
            );
            errors.resize_with(batch_len, || {
                Some(ProducerError::Client("no result for message".to_string()))
            });
        }
        if errors.iter().all(Option::is_none) {
            Ok(())
        } else {
            Err(PublishError::Bulk(Self { errors }))
        }
    }

    pub fn errors(&self) -> &[Option<ProducerError>] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }
}

impl fmt::Display for BulkPublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} messages were not accepted",
            self.failed_count(),
            self.errors.len()
        )
    }
}

impl std::error::Error for BulkPublishError {}

/// The failure result of [`Producer::produce_bulk`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// Some messages were accepted, some were not.
    #[error("bulk publish partially failed: {0}")]
    Bulk(BulkPublishError),

    /// The call was refused before any message was accepted.
    #[error("bulk publish rejected: {0}")]
    Rejected(ProducerError),
}

impl PublishError {
    /// How many messages of a `batch_len` batch this error accounts as failed,
    /// never more than `batch_len`. An outright rejection fails the whole batch.
    pub fn failed_count(&self, batch_len: usize) -> usize {
        match self {
            PublishError::Bulk(bulk) => bulk.failed_count().min(batch_len),
            PublishError::Rejected(_) => batch_len,
        }
    }
}

/// A message broker client able to publish batches.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Submits every event of the batch. Accepted messages are confirmed later on
    /// `deliveries`, one report per message.
    async fn produce_bulk(
        &self,
        events: &[Event],
        deliveries: &mpsc::Sender<DeliveryReport>,
    ) -> Result<(), PublishError>;

    /// Waits up to `timeout` for outstanding messages. Returns how many remain.
    async fn flush(&self, timeout: Duration) -> usize;

    /// Releases the client. Further publishes are rejected.
    async fn close(&self);
}
