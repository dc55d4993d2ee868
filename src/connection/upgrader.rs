// src/connection/upgrader.rs

//! Turns a negotiated duplex socket into a registered [`Connection`].

use super::conn::{Connection, FrameReader};
use super::identity::ConnectionIdentity;
use super::registry::Registry;
use crate::config::WebSocketConfig;
use crate::core::EventGateError;
use crate::core::metrics;
use crate::core::protocol::{Code, Codec, SendEventResponse};
use axum::extract::ws::{CloseFrame, Message as Frame, WebSocketUpgrade, close_code};
use axum::http::{HeaderMap, header};
use futures::{Sink, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Validates, identifies and registers incoming duplex connections.
#[derive(Clone)]
pub struct Upgrader {
    config: WebSocketConfig,
    registry: Arc<Registry>,
    prober_intake: mpsc::Sender<Arc<Connection>>,
    shutdown: CancellationToken,
}

impl Upgrader {
    /// `shutdown` is the server-wide token; every connection gets a child of it.
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<Registry>,
        prober_intake: mpsc::Sender<Arc<Connection>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            prober_intake,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Reads the connection identity from the configured headers.
    pub fn identify(&self, headers: &HeaderMap) -> ConnectionIdentity {
        ConnectionIdentity::from_headers(
            headers,
            &self.config.conn_id_header,
            &self.config.conn_group_header,
            &self.config.conn_group_default,
        )
    }

    /// Returns false when origin checking is on and the request's origin is not allowed.
    pub fn check_origin(&self, headers: &HeaderMap) -> bool {
        if !self.config.check_origin {
            return true;
        }
        headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|origin| self.config.allowed_origins.iter().any(|o| o == origin))
    }

    /// Applies the configured buffer and frame limits to the handshake.
    pub fn configure(&self, upgrade: WebSocketUpgrade) -> WebSocketUpgrade {
        upgrade
            .read_buffer_size(self.config.read_buffer_size)
            .write_buffer_size(self.config.write_buffer_size)
            .max_message_size(self.config.max_message_size)
    }

    /// Splits an upgraded socket and registers it.
    pub async fn accept<S>(
        &self,
        socket: S,
        identity: ConnectionIdentity,
    ) -> Result<(Arc<Connection>, FrameReader<futures::stream::SplitStream<S>>), EventGateError>
    where
        S: Sink<Frame, Error = axum::Error>
            + Stream<Item = Result<Frame, axum::Error>>
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split();
        self.register(identity, sink, stream).await
    }

    /// Registers the two halves of a socket under `identity` and admits the
    /// connection to the liveness prober.
    ///
    /// When the registry refuses the connection, the peer receives a structured
    /// error response followed by a policy-violation close frame, and the
    /// connection is never registered.
    pub async fn register<K, R>(
        &self,
        identity: ConnectionIdentity,
        sink: K,
        stream: R,
    ) -> Result<(Arc<Connection>, FrameReader<R>), EventGateError>
    where
        K: Sink<Frame, Error = axum::Error> + Send + 'static,
        R: Stream<Item = Result<Frame, axum::Error>> + Unpin,
    {
        let conn = Arc::new(Connection::with_shutdown(
            identity,
            sink,
            self.config.write_wait_interval,
            self.shutdown.child_token(),
        ));
        let group = conn.identity().group.clone();

        if let Err(e) = self.registry.add(&conn) {
            let (reason, code) = match e {
                EventGateError::CapacityExceeded { .. } => {
                    ("serverlimit", Code::MaxConnectionLimitReached)
                }
                _ => ("exists", Code::MaxUserLimitReached),
            };
            warn!("Rejecting connection {}: {}", conn.identity(), e);
            metrics::USER_CONNECTION_FAILURE_TOTAL
                .with_label_values(&[reason, group.as_str()])
                .inc();
            self.reject(&conn, code, &e).await;
            return Err(e);
        }

        metrics::USER_CONNECTION_SUCCESS_TOTAL
            .with_label_values(&[group.as_str()])
            .inc();
        info!("New connection {} registered.", conn.identity());

        // The intake is sized to the connection ceiling, so this only fails if the
        // prober is gone.
        if let Err(e) = self.prober_intake.try_send(conn.clone()) {
            warn!("Could not admit {} to the liveness prober: {}", conn.identity(), e);
        }

        let reader = FrameReader::new(stream, self.config.pong_wait_interval);
        Ok((conn, reader))
    }

    async fn reject(&self, conn: &Connection, code: Code, error: &EventGateError) {
        let response = SendEventResponse::error(code, error.to_string());
        match Codec::Binary.encode_frame(&response) {
            Ok(frame) => {
                if let Err(e) = conn.write_message(frame).await {
                    debug!("Could not send rejection to {}: {}", conn.identity(), e);
                }
            }
            Err(e) => warn!("Could not encode rejection response: {}", e),
        }
        conn.close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: error.to_string().into(),
        }))
        .await;
    }
}
