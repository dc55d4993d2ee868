// src/config.rs

//! Manages server configuration: loading, resolving defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Settings for the duplex (WebSocket) endpoint and its connections.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebSocketConfig {
    /// The ceiling on concurrently registered connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,
    /// Frames larger than this are refused by the protocol layer.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// If true, upgrades are only accepted from `allowed_origins`.
    #[serde(default)]
    pub check_origin: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(with = "humantime_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,
    /// The longest the server waits for any frame (pongs included) before giving up.
    #[serde(with = "humantime_serde", default = "default_pong_wait_interval")]
    pub pong_wait_interval: Duration,
    /// The deadline applied to every write, including pings.
    #[serde(with = "humantime_serde", default = "default_write_wait_interval")]
    pub write_wait_interval: Duration,
    #[serde(default = "default_conn_id_header")]
    pub conn_id_header: String,
    #[serde(default = "default_conn_group_header")]
    pub conn_group_header: String,
    #[serde(default = "default_conn_group_default")]
    pub conn_group_default: String,
}

fn default_max_connections() -> usize {
    30000
}
fn default_buffer_size() -> usize {
    10240
}
fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB
}
fn default_ping_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_pong_wait_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_write_wait_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_conn_id_header() -> String {
    "x-user-id".to_string()
}
fn default_conn_group_header() -> String {
    "x-user-group".to_string()
}
fn default_conn_group_default() -> String {
    "--default--".to_string()
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
            max_message_size: default_max_message_size(),
            check_origin: false,
            allowed_origins: vec![],
            ping_interval: default_ping_interval(),
            pong_wait_interval: default_pong_wait_interval(),
            write_wait_interval: default_write_wait_interval(),
            conn_id_header: default_conn_id_header(),
            conn_group_header: default_conn_group_header(),
            conn_group_default: default_conn_group_default(),
        }
    }
}

/// Settings for the publishing worker pool and the queue in front of it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Capacity of the pipeline queue, in batches.
    #[serde(default = "default_delivery_queue_size")]
    pub delivery_queue_size: usize,
    /// Capacity of each worker's confirmation channel, in messages.
    #[serde(default = "default_delivery_channel_size")]
    pub delivery_channel_size: usize,
    /// How long shutdown waits for queued batches to be published.
    #[serde(with = "humantime_serde", default = "default_worker_flush_timeout")]
    pub flush_timeout: Duration,
}

fn default_pool_size() -> usize {
    5
}
fn default_delivery_queue_size() -> usize {
    100
}
fn default_delivery_channel_size() -> usize {
    100
}
fn default_worker_flush_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            delivery_queue_size: default_delivery_queue_size(),
            delivery_channel_size: default_delivery_channel_size(),
            flush_timeout: default_worker_flush_timeout(),
        }
    }
}

/// Settings for the collector's hand-off to the pipeline queue.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CollectorConfig {
    /// How long a handler may wait for queue space. `0s` waits indefinitely.
    #[serde(with = "humantime_serde", default)]
    pub wait_timeout: Duration,
}

impl CollectorConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        (!self.wait_timeout.is_zero()).then_some(self.wait_timeout)
    }
}

/// Which broker client publishes batches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    Kafka,
    #[default]
    Discard,
}

/// Connection settings for the Kafka producer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,
    /// Topic name template; `%s` is replaced with the event type.
    #[serde(default = "default_topic_format")]
    pub topic_format: String,
    /// Extra client properties passed through verbatim (e.g. `acks`, `linger.ms`).
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}
fn default_topic_format() -> String {
    "clickstream-%s-log".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic_format: default_topic_format(),
            properties: HashMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublisherConfig {
    #[serde(default)]
    pub kind: PublisherKind,
    /// How long shutdown waits for the broker client to deliver outstanding messages.
    #[serde(with = "humantime_serde", default = "default_publisher_flush_timeout")]
    pub flush_timeout: Duration,
    #[serde(default)]
    pub kafka: KafkaConfig,
}

fn default_publisher_flush_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::default(),
            flush_timeout: default_publisher_flush_timeout(),
            kafka: KafkaConfig::default(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    /// How often live connection counts are published.
    #[serde(with = "humantime_serde", default = "default_report_interval")]
    pub report_interval: Duration,
}

fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
            report_interval: default_report_interval(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    websocket: WebSocketConfig,
    #[serde(default)]
    worker: WorkerConfig,
    #[serde(default)]
    collector: CollectorConfig,
    #[serde(default)]
    publisher: PublisherConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            websocket: WebSocketConfig::default(),
            worker: WorkerConfig::default(),
            collector: CollectorConfig::default(),
            publisher: PublisherConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            websocket: raw_config.websocket,
            worker: raw_config.worker,
            collector: raw_config.collector,
            publisher: raw_config.publisher,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        let ws = &self.websocket;
        if ws.max_connections == 0 {
            return Err(anyhow!("websocket.max_connections cannot be 0"));
        }
        if ws.ping_interval.is_zero() {
            return Err(anyhow!("websocket.ping_interval cannot be 0"));
        }
        if ws.write_wait_interval.is_zero() {
            return Err(anyhow!("websocket.write_wait_interval cannot be 0"));
        }
        if ws.pong_wait_interval <= ws.ping_interval {
            warn!(
                "websocket.pong_wait_interval ({:?}) is not longer than ping_interval ({:?}); idle but healthy connections may time out.",
                ws.pong_wait_interval, ws.ping_interval
            );
        }
        if ws.conn_id_header.trim().is_empty() || ws.conn_group_header.trim().is_empty() {
            return Err(anyhow!("websocket connection header names cannot be empty"));
        }
        if ws.check_origin && ws.allowed_origins.is_empty() {
            warn!("websocket.check_origin is on but allowed_origins is empty; every upgrade will be refused.");
        }

        if self.worker.pool_size == 0 {
            return Err(anyhow!("worker.pool_size cannot be 0"));
        }
        if self.worker.delivery_queue_size == 0 {
            return Err(anyhow!("worker.delivery_queue_size cannot be 0"));
        }
        if self.worker.delivery_channel_size == 0 {
            return Err(anyhow!("worker.delivery_channel_size cannot be 0"));
        }

        if self.publisher.kind == PublisherKind::Kafka {
            let kafka = &self.publisher.kafka;
            if kafka.brokers.trim().is_empty() {
                return Err(anyhow!("publisher.kafka.brokers cannot be empty"));
            }
            if !kafka.topic_format.contains("%s") {
                return Err(anyhow!(
                    "publisher.kafka.topic_format must contain '%s' for the event type"
                ));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
            if self.metrics.report_interval.is_zero() {
                return Err(anyhow!("metrics.report_interval cannot be 0"));
            }
        }
        Ok(())
    }
}
