// tests/integration/rest_test.rs

//! The request/response routes, driven through the router without a socket.

use super::test_helpers::{init_tracing, make_request, unique_group};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use eventgate::config::WebSocketConfig;
use eventgate::connection::{IngestionHandler, Registry, Upgrader, prober};
use eventgate::core::collection::Collector;
use eventgate::core::metrics::BATCHES_READ_TOTAL;
use eventgate::core::pipeline::{self, QueueReceiver};
use eventgate::core::protocol::{Code, Codec, SendEventResponse, Status};
use eventgate::server::{AppState, router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn app(queue_capacity: usize) -> (Router, QueueReceiver) {
    init_tracing();
    let registry = Arc::new(Registry::new(10));
    let (intake_tx, _intake_rx) = prober::intake_channel(10);
    let shutdown = CancellationToken::new();
    let (queue_tx, queue) = pipeline::channel(queue_capacity);
    let collector = Collector::new(queue_tx, None);
    let upgrader = Upgrader::new(
        WebSocketConfig::default(),
        registry.clone(),
        intake_tx,
        shutdown.clone(),
    );
    let handler = IngestionHandler::new(collector.clone(), registry);
    let state = AppState::new(upgrader, handler, collector, shutdown);
    (router(state), queue)
}

async fn read_response(response: axum::response::Response, codec: Codec) -> SendEventResponse {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    codec.deserialize(&body).unwrap()
}

#[tokio::test]
async fn test_ping_returns_pong() {
    let (app, _queue) = app(4);
    let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"pong");
}

#[tokio::test]
async fn test_post_json_batch() {
    let (app, queue) = app(4);
    let payload = Codec::Text.serialize(&make_request("rest-json", 2, "click")).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "rest-user")
        .header("x-user-group", "web")
        .body(Body::from(payload))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let ack = read_response(response, Codec::Text).await;
    assert_eq!(ack.status, Status::Success as i32);
    assert_eq!(ack.data.get("req_guid").map(String::as_str), Some("rest-json"));

    let queued = queue.pop().await.unwrap();
    assert_eq!(queued.identity.id, "rest-user");
    assert_eq!(queued.identity.group, "web");
    assert_eq!(queued.events().len(), 2);
}

#[tokio::test]
async fn test_post_protobuf_batch() {
    let (app, queue) = app(4);
    let payload = Codec::Binary.serialize(&make_request("rest-proto", 1, "view")).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header(header::CONTENT_TYPE, "application/x-protobuf")
        .body(Body::from(payload))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/proto"
    );
    let ack = read_response(response, Codec::Binary).await;
    assert_eq!(ack.code, Code::Ok as i32);

    let queued = queue.pop().await.unwrap();
    assert_eq!(queued.identity.group, "--default--");
    assert!(!queued.identity.id.is_empty());
}

#[tokio::test]
async fn test_post_malformed_body_is_bad_request() {
    let (app, _queue) = app(4);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"events\": 12"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let ack = read_response(response, Codec::Text).await;
    assert_eq!(ack.status, Status::Error as i32);
    assert_eq!(ack.code, Code::BadRequest as i32);
    assert!(!ack.reason.is_empty());
}

#[tokio::test]
async fn test_post_to_closed_pipeline_is_internal_error() {
    let (app, queue) = app(4);
    queue.close();
    let group = unique_group("rest-closed");
    let payload = Codec::Text.serialize(&make_request("late", 1, "click")).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("x-user-group", group.as_str())
        .body(Body::from(payload))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let ack = read_response(response, Codec::Text).await;
    assert_eq!(ack.code, Code::InternalError as i32);
    assert!(ack.reason.contains("cannot accept request"));
    assert_eq!(
        BATCHES_READ_TOTAL
            .with_label_values(&["failed", "collect", group.as_str()])
            .get(),
        1.0
    );
    assert_eq!(
        BATCHES_READ_TOTAL
            .with_label_values(&["success", "", group.as_str()])
            .get(),
        0.0
    );
}

#[tokio::test]
async fn test_get_without_upgrade_is_refused() {
    let (app, _queue) = app(4);
    let request = Request::builder()
        .uri("/api/v1/events")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}
