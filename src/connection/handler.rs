// src/connection/handler.rs

//! Defines the `IngestionHandler`, the per-connection read loop.

use super::conn::{Connection, FrameReader};
use super::guard::ConnectionGuard;
use super::registry::Registry;
use crate::core::collection::{CollectRequest, Collector};
use crate::core::metrics;
use crate::core::protocol::{Code, Codec, SendEventRequest, SendEventResponse};
use axum::extract::ws::{CloseFrame, Message as Frame, close_code};
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Reads batches off one connection and hands them to the collector.
///
/// Frames of one connection are decoded, collected and acknowledged in order by a
/// single task, so per-connection ordering holds all the way to the queue.
#[derive(Clone)]
pub struct IngestionHandler {
    collector: Collector,
    registry: Arc<Registry>,
}

impl IngestionHandler {
    pub fn new(collector: Collector, registry: Arc<Registry>) -> Self {
        Self {
            collector,
            registry,
        }
    }

    /// Runs the read loop until the peer goes away, the connection is evicted or
    /// the server shuts down. The connection leaves the registry on return.
    pub async fn run<S>(&self, conn: Arc<Connection>, mut reader: FrameReader<S>)
    where
        S: Stream<Item = Result<Frame, axum::Error>> + Unpin,
    {
        let _guard = ConnectionGuard::new(self.registry.clone(), conn.clone());
        let group = conn.identity().group.clone();

        loop {
            let result = tokio::select! {
                biased;
                _ = conn.closed() => {
                    info!("Connection {} is closing.", conn.identity());
                    conn.close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server closing connection".into(),
                    }))
                    .await;
                    break;
                }
                result = reader.read_message() => result,
            };

            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    if e.is_close_error() {
                        error!("{} closed abruptly: {}", conn.identity(), e);
                    } else {
                        error!(
                            "Reading message failed. Unknown failure for {}: {}",
                            conn.identity(),
                            e
                        );
                    }
                    metrics::record_batch_read("failed", e.read_failure_reason(), &group);
                    break;
                }
            };

            self.handle_frame(&conn, frame).await;
        }
    }

    /// Decodes one data frame, collects it and writes the acknowledgement.
    /// A bad frame is answered with an error response; the loop goes on.
    pub async fn handle_frame(&self, conn: &Connection, frame: Frame) {
        let Some(codec) = Codec::for_frame(&frame) else {
            return;
        };
        let identity = conn.identity();
        let group = identity.group.as_str();

        let request: SendEventRequest = match codec.decode_frame(&frame) {
            Ok(request) => request,
            Err(e) => {
                error!("Reading message failed for {}: {}", identity, e);
                metrics::record_batch_read("failed", "serde", group);
                let response = SendEventResponse::error(
                    Code::BadRequest,
                    format!("cannot deserialize request: {e}"),
                );
                write_response(conn, codec, &response).await;
                return;
            }
        };
        let time_consumed = Instant::now();
        metrics::record_events_received(&request.events, group);

        let req_guid = request.req_guid.clone();
        let collect_request = CollectRequest::new(identity.clone(), request, time_consumed);
        let ctx = conn.shutdown_token();
        let response = match self.collector.collect(&ctx, collect_request).await {
            Ok(()) => {
                metrics::record_batch_read("success", "", group);
                SendEventResponse::success(&req_guid)
            }
            Err(e) => {
                warn!("Collecting batch {} from {} failed: {}", req_guid, identity, e);
                metrics::record_batch_read("failed", "collect", group);
                SendEventResponse::error(Code::InternalError, format!("cannot accept request: {e}"))
            }
        };
        write_response(conn, codec, &response).await;
    }
}

async fn write_response(conn: &Connection, codec: Codec, response: &SendEventResponse) {
    let frame = match codec.encode_frame(response) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Could not encode response for {}: {}", conn.identity(), e);
            return;
        }
    };
    if let Err(e) = conn.write_message(frame).await {
        debug!("Writing response to {} failed: {}", conn.identity(), e);
    }
}
