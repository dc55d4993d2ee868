// tests/integration/upgrade_test.rs

//! End-to-end tests over a real socket: upgrade, ingest, reject, disconnect.

use super::test_helpers::{MockBehavior, MockProducer, TestServer, make_request};
use eventgate::config::WebSocketConfig;
use eventgate::core::protocol::{Code, Codec, SendEventResponse, Status};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(server: &TestServer, id: &str, group: &str) -> Client {
    let mut request = server.ws_url().into_client_request().unwrap();
    request.headers_mut().insert("x-user-id", id.parse().unwrap());
    request.headers_mut().insert("x-user-group", group.parse().unwrap());
    let (client, _response) = connect_async(request).await.unwrap();
    client
}

/// Reads the next data frame as a response, skipping control frames.
async fn next_response(client: &mut Client) -> (Codec, SendEventResponse) {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("response in time")
            .expect("open stream")
            .expect("valid frame");
        match message {
            Message::Binary(data) => return (Codec::Binary, Codec::Binary.deserialize(&data).unwrap()),
            Message::Text(text) => {
                return (Codec::Text, Codec::Text.deserialize(text.as_str().as_bytes()).unwrap());
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_close(client: &mut Client, code: CloseCode) {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("close in time")
        {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, code);
                return;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_binary_batch_end_to_end() {
    let producer = MockProducer::new(MockBehavior::AcceptAll);
    let server = TestServer::start_with(WebSocketConfig::default(), producer.clone(), 16).await;
    let mut client = connect(&server, "user-1", "mobile").await;
    server.wait_for_connections(1).await;

    let request = make_request("e2e-binary", 3, "click");
    client
        .send(Message::Binary(Codec::Binary.serialize(&request).unwrap()))
        .await
        .unwrap();

    let (codec, response) = next_response(&mut client).await;
    assert_eq!(codec, Codec::Binary);
    assert_eq!(response.status, Status::Success as i32);
    assert_eq!(response.data.get("req_guid").map(String::as_str), Some("e2e-binary"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while producer.batches().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(producer.batches().len(), 1);
    assert_eq!(producer.batches()[0].len(), 3);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_text_then_valid_batch() {
    let server = TestServer::start(WebSocketConfig::default()).await;
    let mut client = connect(&server, "user-1", "web").await;

    client.send(Message::Text("not json".into())).await.unwrap();
    let (codec, response) = next_response(&mut client).await;
    assert_eq!(codec, Codec::Text);
    assert_eq!(response.code, Code::BadRequest as i32);
    assert!(!response.reason.is_empty());

    let request = make_request("after-bad", 1, "view");
    let json = String::from_utf8(Codec::Text.serialize(&request).unwrap().to_vec()).unwrap();
    client.send(Message::Text(json.into())).await.unwrap();
    let (_, response) = next_response(&mut client).await;
    assert_eq!(response.status, Status::Success as i32);
    assert_eq!(response.data.get("req_guid").map(String::as_str), Some("after-bad"));

    server.stop().await;
}

#[tokio::test]
async fn test_connection_beyond_ceiling_is_rejected() {
    let config = WebSocketConfig {
        max_connections: 1,
        ..WebSocketConfig::default()
    };
    let server = TestServer::start(config).await;
    let _first = connect(&server, "user-1", "g").await;
    server.wait_for_connections(1).await;

    let mut second = connect(&server, "user-2", "g").await;
    let (_, response) = next_response(&mut second).await;
    assert_eq!(response.status, Status::Error as i32);
    assert_eq!(response.code, Code::MaxConnectionLimitReached as i32);
    expect_close(&mut second, CloseCode::Policy).await;
    assert_eq!(server.registry.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_duplicate_identity_is_rejected() {
    let server = TestServer::start(WebSocketConfig::default()).await;
    let _first = connect(&server, "same-user", "g").await;
    server.wait_for_connections(1).await;

    let mut second = connect(&server, "same-user", "g").await;
    let (_, response) = next_response(&mut second).await;
    assert_eq!(response.code, Code::MaxUserLimitReached as i32);
    expect_close(&mut second, CloseCode::Policy).await;
    assert_eq!(server.registry.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_releases_registry_slot() {
    let server = TestServer::start(WebSocketConfig::default()).await;
    let mut client = connect(&server, "user-1", "g").await;
    server.wait_for_connections(1).await;
    assert_eq!(
        server.registry.total_connections_per_group().get("g"),
        Some(&1)
    );

    client.close(None).await.unwrap();
    server.wait_for_connections(0).await;
    assert!(server.registry.total_connections_per_group().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() {
    let config = WebSocketConfig {
        check_origin: true,
        allowed_origins: vec!["https://app.example.com".to_string()],
        ..WebSocketConfig::default()
    };
    let server = TestServer::start(config).await;

    let mut request = server.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "https://evil.example.com".parse().unwrap());
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected 403, got {:?}", other.map(|(_, r)| r.status())),
    }

    let mut request = server.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "https://app.example.com".parse().unwrap());
    assert!(connect_async(request).await.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn test_server_shutdown_closes_connections() {
    let server = TestServer::start(WebSocketConfig::default()).await;
    let mut client = connect(&server, "user-1", "g").await;
    server.wait_for_connections(1).await;

    server.shutdown.cancel();
    expect_close(&mut client, CloseCode::Away).await;
    server.wait_for_connections(0).await;

    server.stop().await;
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let config = WebSocketConfig {
        pong_wait_interval: Duration::from_millis(200),
        ..WebSocketConfig::default()
    };
    let server = TestServer::start(config).await;
    // The client is never polled again, so it sends nothing after the handshake.
    let _client = connect(&server, "quiet", "g").await;
    server.wait_for_connections(1).await;
    server.wait_for_connections(0).await;

    server.stop().await;
}
