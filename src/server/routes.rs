// src/server/routes.rs

//! The HTTP surface: the health probe, the duplex events endpoint and its
//! request/response fallback.

use crate::connection::{IngestionHandler, Upgrader};
use crate::core::collection::{CollectRequest, Collector};
use crate::core::metrics;
use crate::core::protocol::{Code, Codec, SendEventRequest, SendEventResponse};
use axum::{
    Router,
    body::Bytes,
    extract::{State, ws::WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    upgrader: Upgrader,
    handler: IngestionHandler,
    collector: Collector,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        upgrader: Upgrader,
        handler: IngestionHandler,
        collector: Collector,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            upgrader,
            handler,
            collector,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/api/v1/events", get(events_duplex).post(events_rest))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn events_duplex(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !state.upgrader.check_origin(&headers) {
        warn!(
            "Refusing upgrade from disallowed origin {:?}.",
            headers.get(header::ORIGIN)
        );
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    let identity = state.upgrader.identify(&headers);
    state
        .upgrader
        .configure(upgrade)
        .on_upgrade(move |socket| async move {
            match state.upgrader.accept(socket, identity).await {
                Ok((conn, reader)) => state.handler.run(conn, reader).await,
                Err(e) => debug!("Upgrade did not produce a connection: {}", e),
            }
        })
}

/// Accepts one batch per request. The codec follows the `Content-Type` header and
/// the response is written in the same codec.
async fn events_rest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let codec = Codec::for_content_type(content_type);
    let identity = state.upgrader.identify(&headers);
    let group = identity.group.clone();

    let request: SendEventRequest = match codec.deserialize(&body) {
        Ok(request) => request,
        Err(e) => {
            error!("Reading request failed for {}: {}", identity, e);
            metrics::record_batch_read("failed", "serde", &group);
            let response = SendEventResponse::error(
                Code::BadRequest,
                format!("cannot deserialize request: {e}"),
            );
            return respond(codec, StatusCode::BAD_REQUEST, &response);
        }
    };
    let time_consumed = Instant::now();
    metrics::record_events_received(&request.events, &group);

    let req_guid = request.req_guid.clone();
    let collect_request = CollectRequest::new(identity, request, time_consumed);
    match state.collector.collect(&state.shutdown, collect_request).await {
        Ok(()) => {
            metrics::record_batch_read("success", "", &group);
            respond(codec, StatusCode::OK, &SendEventResponse::success(&req_guid))
        }
        Err(e) => {
            warn!("Collecting batch {} failed: {}", req_guid, e);
            metrics::record_batch_read("failed", "collect", &group);
            let response =
                SendEventResponse::error(Code::InternalError, format!("cannot accept request: {e}"));
            respond(codec, StatusCode::INTERNAL_SERVER_ERROR, &response)
        }
    }
}

fn respond(codec: Codec, status: StatusCode, response: &SendEventResponse) -> Response {
    match codec.serialize(response) {
        Ok(body) => (status, [(header::CONTENT_TYPE, codec.content_type())], body).into_response(),
        Err(e) => {
            error!("Could not encode response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
