// tests/integration/test_helpers.rs

//! Test helpers and utilities shared by the integration, unit and property tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::ws::Message as Frame;
use bytes::Bytes;
use eventgate::config::WebSocketConfig;
use eventgate::connection::{
    Connection, ConnectionIdentity, IngestionHandler, Prober, Registry, Upgrader, prober,
};
use eventgate::core::collection::{CollectRequest, Collector};
use eventgate::core::pipeline::{self, QueueReceiver};
use eventgate::core::protocol::{Event, SendEventRequest, Timestamp};
use eventgate::core::publisher::{
    BulkPublishError, DeliveryReport, Producer, ProducerError, PublishError,
};
use eventgate::core::worker::Pool;
use eventgate::server::{self, AppState};
use futures::channel::mpsc as fmpsc;
use futures::{Sink, SinkExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

/// Sets up minimal tracing for tests. Safe to call from every test.
pub fn init_tracing() {
    let env_filter = EnvFilter::new("warn");
    let (filter, _reload_handle) = reload::Layer::new(env_filter);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A group name no other test uses, so metric assertions are not disturbed by
/// tests running in parallel.
pub fn unique_group(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

pub fn identity(id: &str, group: &str) -> ConnectionIdentity {
    ConnectionIdentity::new(id, group)
}

pub fn event(event_type: &str, payload: &'static [u8]) -> Event {
    Event {
        event_bytes: Bytes::from_static(payload),
        r#type: event_type.to_string(),
    }
}

/// A request with `count` events of type `event_type`.
pub fn make_request(req_guid: &str, count: usize, event_type: &str) -> SendEventRequest {
    SendEventRequest {
        req_guid: req_guid.to_string(),
        sent_time: Some(Timestamp::now()),
        events: (0..count).map(|_| event(event_type, b"payload")).collect(),
    }
}

pub fn collect_request(req_guid: &str, count: usize, group: &str) -> CollectRequest {
    CollectRequest::new(
        identity(req_guid, group),
        make_request(req_guid, count, "click"),
        Instant::now(),
    )
}

/// A sink that forwards every written frame to the returned receiver.
pub fn frame_sink() -> (
    impl Sink<Frame, Error = axum::Error> + Send + 'static,
    fmpsc::UnboundedReceiver<Frame>,
) {
    let (tx, rx) = fmpsc::unbounded();
    (tx.sink_map_err(axum::Error::new), rx)
}

/// A sink that never accepts a frame, to exercise write deadlines.
pub fn stalled_sink() -> impl Sink<Frame, Error = axum::Error> + Send + 'static {
    futures::sink::unfold((), |(), _frame: Frame| async move {
        futures::future::pending::<Result<(), axum::Error>>().await
    })
}

/// A stream of inbound frames fed through the returned sender.
pub fn frame_stream() -> (
    fmpsc::UnboundedSender<Result<Frame, axum::Error>>,
    fmpsc::UnboundedReceiver<Result<Frame, axum::Error>>,
) {
    fmpsc::unbounded()
}

/// A connection whose outbound frames are captured.
pub fn test_connection(
    identity: ConnectionIdentity,
) -> (Arc<Connection>, fmpsc::UnboundedReceiver<Frame>) {
    let (sink, rx) = frame_sink();
    (
        Arc::new(Connection::new(identity, sink, Duration::from_secs(1))),
        rx,
    )
}

/// What the mock producer does with each batch.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Accepts and confirms every message.
    AcceptAll,
    /// Refuses the messages at these positions, accepts the rest.
    FailPositions(HashSet<usize>),
    /// Refuses the whole call.
    Reject,
    /// Confirms every message with a delivery error.
    FailDeliveries,
}

/// A scriptable in-memory broker client.
pub struct MockProducer {
    behavior: Mutex<MockBehavior>,
    delay: Mutex<Option<Duration>>,
    batches: Mutex<Vec<Vec<Event>>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    closed: Mutex<bool>,
}

impl MockProducer {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            delay: Mutex::new(None),
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
            closed: Mutex::new(false),
        })
    }

    /// Every publish call sleeps for `delay` before returning.
    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Every publish call waits for the returned notifier before returning.
    pub fn gated(self: &Arc<Self>) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(notify.clone());
        notify
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl Producer for MockProducer {
    async fn produce_bulk(
        &self,
        events: &[Event],
        deliveries: &mpsc::Sender<DeliveryReport>,
    ) -> Result<(), PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.batches.lock().push(events.to_vec());

        let behavior = self.behavior.lock().clone();
        match behavior {
            MockBehavior::AcceptAll => {
                for e in events {
                    let _ = deliveries.send(DeliveryReport::delivered(e.r#type.clone())).await;
                }
                Ok(())
            }
            MockBehavior::FailDeliveries => {
                for e in events {
                    let report = DeliveryReport::failed(
                        e.r#type.clone(),
                        ProducerError::Delivery("broker unavailable".into()),
                    );
                    let _ = deliveries.send(report).await;
                }
                Ok(())
            }
            MockBehavior::FailPositions(positions) => {
                let errors = (0..events.len())
                    .map(|i| {
                        positions
                            .contains(&i)
                            .then(|| ProducerError::UnknownTopic(events[i].r#type.clone()))
                    })
                    .collect();
                BulkPublishError::check(events.len(), errors)
            }
            MockBehavior::Reject => Err(PublishError::Rejected(ProducerError::QueueFull)),
        }
    }

    async fn flush(&self, _timeout: Duration) -> usize {
        0
    }

    async fn close(&self) {
        *self.closed.lock() = true;
    }
}

/// The server's routes bound to an ephemeral port, with the pipeline behind them.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub pool: Arc<Pool>,
    pub producer: Arc<MockProducer>,
    pub shutdown: CancellationToken,
    prober_shutdown: broadcast::Sender<()>,
}

impl TestServer {
    pub async fn start(websocket: WebSocketConfig) -> Self {
        Self::start_with(websocket, MockProducer::new(MockBehavior::AcceptAll), 16).await
    }

    pub async fn start_with(
        websocket: WebSocketConfig,
        producer: Arc<MockProducer>,
        queue_capacity: usize,
    ) -> Self {
        init_tracing();
        let shutdown = CancellationToken::new();
        let (queue_tx, queue_rx) = pipeline::channel(queue_capacity);
        let pool = Arc::new(Pool::new(2, 16, queue_rx, producer.clone()));
        pool.start_workers();
        let collector = Collector::new(queue_tx, None);

        let registry = Arc::new(Registry::new(websocket.max_connections));
        let (intake_tx, intake_rx) = prober::intake_channel(websocket.max_connections);
        let prober = Prober::new(registry.clone(), intake_rx, websocket.ping_interval);
        let (prober_shutdown, _) = broadcast::channel(1);
        let prober_rx = prober_shutdown.subscribe();
        tokio::spawn(prober.run(prober_rx));

        let upgrader = Upgrader::new(websocket, registry.clone(), intake_tx, shutdown.clone());
        let handler = IngestionHandler::new(collector.clone(), registry.clone());
        let state = AppState::new(upgrader, handler, collector, shutdown.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let stop = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, server::router(state))
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
                .expect("test server");
        });

        Self {
            addr,
            registry,
            pool,
            producer,
            shutdown,
            prober_shutdown,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/events", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Waits until the registry holds `expected` connections.
    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.registry.len() != expected {
            assert!(
                Instant::now() < deadline,
                "registry has {} connections, expected {}",
                self.registry.len(),
                expected
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.prober_shutdown.send(());
        self.pool.flush_with_timeout(Duration::from_secs(2)).await;
    }
}

/// Pops everything currently queued without waiting.
pub async fn drain_now(queue: &QueueReceiver) -> Vec<CollectRequest> {
    let mut drained = Vec::new();
    while let Ok(Some(request)) =
        tokio::time::timeout(Duration::from_millis(20), queue.pop()).await
    {
        drained.push(request);
    }
    drained
}
