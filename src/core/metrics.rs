// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the ingestion pipeline.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle. Labels play the role of tags:
//! `conn_group` partitions by connection group, `worker` by publishing worker.

use crate::core::protocol::Event;
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramVec, TextEncoder, register_counter_vec,
    register_gauge, register_gauge_vec, register_histogram_vec,
};

/// Millisecond buckets shared by every latency histogram.
const LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

lazy_static! {
    // --- Connection lifecycle ---
    /// Live connections per group, refreshed by the connection metrics reporter.
    pub static ref CONNECTIONS_COUNT_CURRENT: GaugeVec =
        register_gauge_vec!("connections_count_current", "Number of live duplex connections.", &["conn_group"]).unwrap();
    pub static ref USER_CONNECTION_SUCCESS_TOTAL: CounterVec =
        register_counter_vec!("user_connection_success_total", "Total number of accepted connection upgrades.", &["conn_group"]).unwrap();
    pub static ref USER_CONNECTION_FAILURE_TOTAL: CounterVec =
        register_counter_vec!("user_connection_failure_total", "Total number of rejected connection upgrades.", &["reason", "conn_group"]).unwrap();
    pub static ref SERVER_PING_FAILURE_TOTAL: CounterVec =
        register_counter_vec!("server_ping_failure_total", "Total number of liveness pings that failed.", &["conn_group"]).unwrap();

    // --- Ingestion ---
    pub static ref BATCHES_READ_TOTAL: CounterVec =
        register_counter_vec!("batches_read_total", "Total number of batches read from clients.", &["status", "reason", "conn_group"]).unwrap();
    pub static ref EVENTS_RX_TOTAL: CounterVec =
        register_counter_vec!("events_rx_total", "Total number of events received.", &["conn_group", "event_type"]).unwrap();
    pub static ref EVENTS_RX_BYTES_TOTAL: CounterVec =
        register_counter_vec!("events_rx_bytes_total", "Total event payload bytes received.", &["conn_group", "event_type"]).unwrap();
    /// Batches currently waiting in the pipeline queue.
    pub static ref PIPELINE_QUEUE_DEPTH: Gauge =
        register_gauge!("pipeline_queue_depth", "Number of batches waiting for a publishing worker.").unwrap();

    // --- Publishing ---
    pub static ref KAFKA_MESSAGES_DELIVERED_TOTAL: CounterVec =
        register_counter_vec!("kafka_messages_delivered_total", "Total number of messages handed to the broker, by outcome.", &["success", "conn_group"]).unwrap();
    pub static ref KAFKA_UNKNOWN_TOPIC_FAILURE_TOTAL: CounterVec =
        register_counter_vec!("kafka_unknown_topic_failure_total", "Total number of messages rejected for an unknown topic.", &["topic", "event_type"]).unwrap();

    // --- Latency histograms ---
    pub static ref BATCH_IDLE_IN_CHANNEL_MILLISECONDS: HistogramVec =
        register_histogram_vec!("batch_idle_in_channel_milliseconds", "Time a batch spent in the pipeline queue.", &["worker"], LATENCY_BUCKETS_MS.to_vec()).unwrap();
    pub static ref WORKER_PROCESSING_DURATION_MILLISECONDS: HistogramVec =
        register_histogram_vec!("worker_processing_duration_milliseconds", "Per-event time a worker spent publishing a batch.", &["worker"], LATENCY_BUCKETS_MS.to_vec()).unwrap();
    pub static ref EVENT_PROCESSING_DURATION_MILLISECONDS: HistogramVec =
        register_histogram_vec!("event_processing_duration_milliseconds", "Per-event time from client send to publish.", &["conn_group"], LATENCY_BUCKETS_MS.to_vec()).unwrap();
    pub static ref SERVER_PROCESSING_LATENCY_MILLISECONDS: HistogramVec =
        register_histogram_vec!("server_processing_latency_milliseconds", "Per-event time from decode to publish.", &["conn_group"], LATENCY_BUCKETS_MS.to_vec()).unwrap();
}

/// Counts one read outcome on a connection. Each batch is counted once: `success`
/// only after it was queued, otherwise `failed` with the reason.
pub fn record_batch_read(status: &str, reason: &str, group: &str) {
    BATCHES_READ_TOTAL
        .with_label_values(&[status, reason, group])
        .inc();
}

/// Counts the events and payload bytes of one decoded batch, per event type.
pub fn record_events_received(events: &[Event], group: &str) {
    for event in events {
        let labels = [group, event.r#type.as_str()];
        EVENTS_RX_BYTES_TOTAL
            .with_label_values(&labels)
            .inc_by(event.event_bytes.len() as f64);
        EVENTS_RX_TOTAL.with_label_values(&labels).inc();
    }
}

/// Counts delivered and failed messages for one published batch.
pub fn record_delivery(group: &str, delivered: usize, failed: usize) {
    KAFKA_MESSAGES_DELIVERED_TOTAL
        .with_label_values(&["true", group])
        .inc_by(delivered as f64);
    KAFKA_MESSAGES_DELIVERED_TOTAL
        .with_label_values(&["false", group])
        .inc_by(failed as f64);
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
