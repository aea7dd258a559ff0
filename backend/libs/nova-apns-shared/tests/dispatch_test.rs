use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nova_apns_shared::{
    ApnsClient, ApnsEndpoint, ApnsError, ApnsMessage, ApnsPayload, ApnsPriority, ApnsReason,
    ApnsResult,
};
use nova_h2::testing::{MockResponse, MockServer, MockServerConnection};
use nova_h2::{ClientConfig, ClientError, Scheme};
use nova_push_auth::{CredentialProfile, TokenManager};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const DEVICE_TOKEN: &str = "9f3c4e1a77b2d8e0c5f6a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f6";

fn client(port: u16) -> ApnsClient {
    let profile = CredentialProfile::from_raw_scalar("TEAM1", "ABC123DEFG", &[0x33; 32]).unwrap();
    ApnsClient::with_token_manager(
        ApnsEndpoint::new(Scheme::Http, "127.0.0.1", port),
        ClientConfig::default(),
        Arc::new(TokenManager::new(profile)),
        "com.example.app",
    )
}

fn message() -> ApnsMessage {
    ApnsMessage::new(DEVICE_TOKEN, ApnsPayload::new().title("Hi").body("There"))
}

#[tokio::test]
async fn successful_dispatch_reports_message_id_and_token() {
    let server = MockServer::start(|_| MockResponse::new(200)).await.unwrap();
    let client = client(server.port());
    let message = message().with_collapse_id("c1").with_thread_id("t1");

    let result = client.send(&message).await.unwrap();
    match &result {
        ApnsResult::Success {
            apns_id,
            device_token,
        } => {
            assert_eq!(apns_id, &message.id.to_string());
            assert_eq!(device_token, DEVICE_TOKEN);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let received = server.received();
    assert_eq!(received.len(), 1);
    let head = &received[0].head;
    assert_eq!(head.path, format!("/3/device/{DEVICE_TOKEN}"));
    assert_eq!(head.headers.first("apns-topic"), Some("com.example.app"));
    assert_eq!(head.headers.first("apns-priority"), Some("10"));
    assert_eq!(head.headers.first("apns-collapse-id"), Some("c1"));
    assert_eq!(head.headers.first("thread-id"), Some("t1"));
    let auth = head.headers.first("authorization").unwrap();
    assert!(auth.starts_with("bearer "));
    assert_eq!(auth.trim_start_matches("bearer ").split('.').count(), 3);

    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["aps"]["alert"]["title"], "Hi");
}

#[tokio::test]
async fn rejection_is_reported_with_reason() {
    let server = MockServer::start(|_| {
        MockResponse::new(400).body(r#"{"reason":"BadDeviceToken"}"#)
    })
    .await
    .unwrap();
    let client = client(server.port());

    let result = client.send(&message()).await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.reason(), Some(ApnsReason::BadDeviceToken));
    assert_eq!(result.device_token(), DEVICE_TOKEN);
}

#[tokio::test]
async fn expired_provider_token_forces_resign() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = MockServer::start(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            MockResponse::new(403).body(r#"{"reason":"ExpiredProviderToken"}"#)
        } else {
            MockResponse::new(200)
        }
    })
    .await
    .unwrap();
    let client = client(server.port());

    let first = client.send(&message()).await.unwrap();
    assert_eq!(first.reason(), Some(ApnsReason::ExpiredProviderToken));
    assert_eq!(client.token_manager().regenerations(), 1);

    let second = client.send(&message()).await.unwrap();
    assert!(second.is_success());
    assert_eq!(client.token_manager().regenerations(), 2);
}

#[tokio::test]
async fn sends_reuse_the_token_and_connection() {
    let server = MockServer::start(|_| MockResponse::new(200)).await.unwrap();
    let client = client(server.port());

    for _ in 0..3 {
        let message = message().with_priority(ApnsPriority::EnergyEfficient);
        assert!(client.send(&message).await.unwrap().is_success());
    }

    assert_eq!(client.token_manager().regenerations(), 1);
    let received = server.received();
    assert_eq!(received.len(), 3);
    // one connection means stream ids keep counting up
    let ids: Vec<u32> = received.iter().map(|r| r.stream_id).collect();
    assert_eq!(ids, [1, 3, 5]);
    assert!(received
        .iter()
        .all(|r| r.head.headers.first("apns-priority") == Some("5")));
}

#[tokio::test]
async fn connection_failure_is_a_network_result() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client(port);
    let message = message();

    let result = client.send(&message).await.unwrap();
    match result {
        ApnsResult::NetworkError {
            apns_id, error, ..
        } => {
            assert_eq!(apns_id, message.id.to_string());
            assert!(error.is_network());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn client_reconnects_after_close() {
    let server = MockServer::start(|_| MockResponse::new(200)).await.unwrap();
    let client = client(server.port());

    assert!(client.send(&message()).await.unwrap().is_success());
    client.close().await;
    assert!(client.send(&message()).await.unwrap().is_success());

    // a fresh connection starts again from stream 1
    let ids: Vec<u32> = server.received().iter().map(|r| r.stream_id).collect();
    assert_eq!(ids, [1, 1]);
}

#[tokio::test]
async fn result_keeps_the_message_id_over_server_apns_id() {
    let server = MockServer::start(|_| MockResponse::new(200).header("apns-id", "SERVER-ID"))
        .await
        .unwrap();
    let client = client(server.port());
    let message = message();

    match client.send(&message).await.unwrap() {
        ApnsResult::Success { apns_id, .. } => assert_eq!(apns_id, message.id.to_string()),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn close_fails_a_stalled_send() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (arrived_tx, arrived_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = MockServerConnection::handshake(stream).await.unwrap();
        let request = conn.next_request().await.unwrap();
        let _ = arrived_tx.send(request.is_some());
        // never answer; wait for the client to hang up
        while let Ok(Some(_)) = conn.next_request().await {}
    });

    let client = Arc::new(client(port));
    let sender = client.clone();
    let pending = tokio::spawn(async move { sender.send(&message()).await });

    assert!(arrived_rx.await.unwrap());
    tokio::time::timeout(Duration::from_secs(3), client.close())
        .await
        .expect("close waited on the stalled exchange");

    let result = tokio::time::timeout(Duration::from_secs(3), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match result {
        ApnsResult::NetworkError { error, .. } => assert!(matches!(
            error,
            ApnsError::Transport(ClientError::ConnectionClosed)
        )),
        other => panic!("unexpected result: {other:?}"),
    }
    server.abort();
}
