//! HttpTransport against a mock HTTP server

use std::sync::Arc;
use std::time::Duration;

use adaptive_request::transport::{HttpTransport, HttpTransportConfig, OutgoingRequest, Transport};
use adaptive_request::types::{Method, Progress};
use adaptive_request::{Client, Error};
use bytes::Bytes;
use mockito::{Matcher, Server};
use parking_lot::Mutex;
use serde_json::json;

fn transport() -> HttpTransport {
    HttpTransport::new(&HttpTransportConfig::default()).unwrap()
}

fn get(url: String) -> OutgoingRequest {
    OutgoingRequest::new(Method::Get, url, Duration::from_secs(5))
}

#[tokio::test]
async fn test_json_body_and_lowercased_headers() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/users/1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("X-Trace", "abc")
        .with_body(r#"{"id":1,"name":"Ada"}"#)
        .create_async()
        .await;

    let resp = transport()
        .send(get(format!("{}/users/1", server.url())), None)
        .await
        .unwrap();
    mock.assert_async().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({"id": 1, "name": "Ada"}));
    assert_eq!(resp.header("x-trace"), Some("abc"));
    assert!(!resp.from_cache);
}

#[tokio::test]
async fn test_request_id_and_custom_headers_are_sent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/ping")
        .match_header("x-request-id", "req-42")
        .match_header("x-tenant", "acme")
        .with_status(204)
        .create_async()
        .await;

    let mut req = get(format!("{}/ping", server.url()));
    req.id = "req-42".into();
    req.headers.insert("x-tenant".into(), "acme".into());
    let resp = transport().send(req, None).await.unwrap();
    mock.assert_async().await;
    assert_eq!(resp.status, 204);
    assert_eq!(resp.body, serde_json::Value::Null);
}

#[tokio::test]
async fn test_server_error_carries_retry_after() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/busy")
        .with_status(503)
        .with_header("retry-after", "2")
        .with_body("try later")
        .create_async()
        .await;

    let err = transport()
        .send(get(format!("{}/busy", server.url())), None)
        .await
        .unwrap_err();
    match &err {
        Error::Http {
            status,
            message,
            retry_after,
            context,
        } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "try later");
            assert_eq!(*retry_after, Some(Duration::from_secs(2)));
            assert_eq!(context.source.as_deref(), Some("http_transport"));
            assert!(context.url.as_deref().unwrap_or_default().ends_with("/busy"));
        }
        other => panic!("expected Http error, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unauthorized_maps_to_auth_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/me")
        .with_status(401)
        .with_body("token expired")
        .create_async()
        .await;

    let err = transport()
        .send(get(format!("{}/me", server.url())), None)
        .await
        .unwrap_err();
    assert!(err.is_auth());
    assert_eq!(err.status(), Some(401));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_client_error_is_not_retryable() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/missing")
        .with_status(404)
        .create_async()
        .await;

    let err = transport()
        .send(get(format!("{}/missing", server.url())), None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let err = transport()
        .send(get("http://127.0.0.1:1/unreachable".into()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network { .. }), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_compressed_body_is_gzipped() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/events")
        .match_header("content-encoding", "gzip")
        .match_header("content-type", "application/json")
        .with_status(202)
        .with_body(r#"{"accepted":true}"#)
        .create_async()
        .await;

    let mut req = OutgoingRequest::new(Method::Post, format!("{}/events", server.url()), Duration::from_secs(5))
        .with_body(json!({"events": vec!["click"; 200]}));
    req.compress = true;
    let resp = transport().send(req, None).await.unwrap();
    mock.assert_async().await;
    assert_eq!(resp.body, json!({"accepted": true}));
}

#[tokio::test]
async fn test_download_progress_reaches_total() {
    let body = "x".repeat(10_000);
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/blob")
        .with_status(200)
        .with_body(&body)
        .create_async()
        .await;

    let reports: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let progress: adaptive_request::types::ProgressFn = Arc::new(move |p| sink.lock().push(p));
    transport()
        .send(get(format!("{}/blob", server.url())), Some(progress))
        .await
        .unwrap();

    let reports = reports.lock();
    let last = reports.last().copied().unwrap();
    assert_eq!(last.loaded, 10_000);
    assert_eq!(last.total, Some(10_000));
    assert!(reports.windows(2).all(|w| w[1].loaded >= w[0].loaded));
}

#[tokio::test]
async fn test_upload_streams_payload_with_progress() {
    let payload = Bytes::from(vec![7u8; 150 * 1024]);
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", "/files/a.bin")
        .match_header("content-type", "application/octet-stream")
        .match_body(Matcher::Any)
        .with_status(201)
        .with_body(r#"{"stored":true}"#)
        .create_async()
        .await;

    let reports: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let progress: adaptive_request::types::ProgressFn = Arc::new(move |p| sink.lock().push(p));
    let req = OutgoingRequest::new(Method::Put, format!("{}/files/a.bin", server.url()), Duration::from_secs(5));
    let resp = transport().upload(req, payload, Some(progress)).await.unwrap();
    mock.assert_async().await;
    assert_eq!(resp.status, 201);

    let reports = reports.lock();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports.last().map(|p| p.loaded), Some(150 * 1024));
}

#[tokio::test]
async fn test_client_caches_over_real_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/config")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"theme":"dark"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = Client::builder().base_url(server.url()).build().unwrap();
    let first = client.get("/config").await.unwrap();
    let second = client.get("/config").await.unwrap();
    mock.assert_async().await;

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.body, json!({"theme": "dark"}));
}
