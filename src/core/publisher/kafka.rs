// src/core/publisher/kafka.rs

//! The Kafka-backed producer.

use super::{BulkPublishError, DeliveryReport, Producer, ProducerError, PublishError};
use crate::config::KafkaConfig;
use crate::core::metrics;
use crate::core::protocol::Event;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Publishes each event to the topic derived from its type.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic_format: String,
    closed: AtomicBool,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, ProducerError> {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", &config.brokers);
        for (key, value) in &config.properties {
            client.set(key, value);
        }
        let producer: FutureProducer = client
            .create()
            .map_err(|e| ProducerError::Client(e.to_string()))?;
        info!("Kafka producer created for brokers {}.", config.brokers);
        Ok(Self {
            producer,
            topic_format: config.topic_format.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn topic_for(&self, event_type: &str) -> String {
        self.topic_format.replacen("%s", event_type, 1)
    }
}

fn classify(error: KafkaError, topic: &str) -> ProducerError {
    match error {
        KafkaError::MessageProduction(
            RDKafkaErrorCode::UnknownTopic | RDKafkaErrorCode::UnknownTopicOrPartition,
        ) => ProducerError::UnknownTopic(topic.to_string()),
        KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => ProducerError::QueueFull,
        other => ProducerError::Client(other.to_string()),
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn produce_bulk(
        &self,
        events: &[Event],
        deliveries: &mpsc::Sender<DeliveryReport>,
    ) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Rejected(ProducerError::Closed));
        }

        let mut errors = Vec::with_capacity(events.len());
        for event in events {
            let topic = self.topic_for(&event.r#type);
            let record: FutureRecord<'_, (), [u8]> =
                FutureRecord::to(&topic).payload(&event.event_bytes[..]);

            match self.producer.send_result(record) {
                Ok(delivery) => {
                    let deliveries = deliveries.clone();
                    let topic = topic.clone();
                    tokio::spawn(async move {
                        let report = match delivery.await {
                            Ok(Ok(_)) => DeliveryReport::delivered(topic),
                            Ok(Err((e, _))) => {
                                let error = ProducerError::Delivery(e.to_string());
                                DeliveryReport::failed(topic, error)
                            }
                            Err(_) => DeliveryReport::failed(
                                topic,
                                ProducerError::Delivery("delivery future cancelled".to_string()),
                            ),
                        };
                        let _ = deliveries.send(report).await;
                    });
                    errors.push(None);
                }
                Err((e, _)) => {
                    let error = classify(e, &topic);
                    if let ProducerError::UnknownTopic(_) = error {
                        metrics::KAFKA_UNKNOWN_TOPIC_FAILURE_TOTAL
                            .with_label_values(&[topic.as_str(), event.r#type.as_str()])
                            .inc();
                    }
                    errors.push(Some(error));
                }
            }
        }
        BulkPublishError::check(events.len(), errors)
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let producer = self.producer.clone();
        let remaining = tokio::task::spawn_blocking(move || {
            let _ = producer.flush(Timeout::After(timeout));
            producer.in_flight_count()
        })
        .await;
        match remaining {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                warn!("Kafka flush task failed: {}", e);
                0
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
