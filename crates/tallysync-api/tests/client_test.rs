#![allow(clippy::unwrap_used)]
// Integration tests for `ApiClient` using wiremock.

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tallysync_api::{ApiClient, ApiRequest, Error, StreamEvent};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApiClient, Url) {
    let server = MockServer::start().await;
    let base = Url::parse(&server.uri()).unwrap();
    (server, ApiClient::from_reqwest(reqwest::Client::new()), base)
}

fn key(value: &str) -> SecretString {
    SecretString::from(value.to_owned())
}

// ── Meta endpoints ──────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_info() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "api_key": "abc123",
            "name": "TallySync Manager",
            "version": "1.0.0",
            "build": "20260217.001",
            "db_path": "/srv/data/tallysync.db"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client
        .fetch_info(&base, Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(info.api_key.as_deref(), Some("abc123"));
    assert_eq!(info.name.as_deref(), Some("TallySync Manager"));
}

#[tokio::test]
async fn test_fetch_info_times_out() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "api_key": "late" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = client
        .fetch_info(&base, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Transport(ref e) if e.is_timeout()),
        "expected timeout, got {err:?}"
    );
}

#[tokio::test]
async fn test_fetch_health() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "ok", "scheduler_running": true })),
        )
        .mount(&server)
        .await;

    let health = client.fetch_health(&base).await.unwrap();
    assert!(health.is_ok());
    assert!(health.scheduler_running);
}

// ── Authenticated calls ─────────────────────────────────────────────

#[tokio::test]
async fn test_execute_sends_api_key_and_total_count() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/companies/3/stock"))
        .and(header("X-API-Key", "k-1"))
        .and(query_param("limit", "50"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Total-Count", "1234")
                .set_body_json(json!([{ "id": 1 }, { "id": 2 }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::get("/api/companies/3/stock").with_query("limit", "50");
    let resp = client
        .execute(&base, Some(&key("k-1")), &request)
        .await
        .unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(resp.total_count, Some(1234));
    assert_eq!(resp.body.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_execute_401_is_unauthorized() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/companies"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid API key" })))
        .mount(&server)
        .await;

    let err = client
        .execute(&base, Some(&key("stale")), &ApiRequest::get("/api/companies"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized(), "got {err:?}");
}

#[tokio::test]
async fn test_execute_error_detail_message() {
    let (server, client, base) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/orders/9/push"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "detail": "Order already pushed to Tally" })),
        )
        .mount(&server)
        .await;

    let request = ApiRequest::new(reqwest::Method::POST, "/api/orders/9/push");
    let err = client
        .execute(&base, Some(&key("k")), &request)
        .await
        .unwrap_err();

    match err {
        Error::Http { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Order already pushed to Tally");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_execute_unparseable_error_body_falls_back() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/reports/daybook"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let err = client
        .execute(&base, Some(&key("k")), &ApiRequest::get("/api/reports/daybook"))
        .await
        .unwrap_err();

    match err {
        Error::Http { status, message } => {
            assert_eq!(status, 502);
            assert_eq!(message, "HTTP 502");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_execute_no_content_is_null() {
    let (server, client, base) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/orders/4"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let request = ApiRequest::new(reqwest::Method::DELETE, "/api/orders/4");
    let resp = client
        .execute(&base, Some(&key("k")), &request)
        .await
        .unwrap();
    assert_eq!(resp.status, 204);
    assert!(resp.body.is_null());
    assert_eq!(resp.total_count, None);
}

#[tokio::test]
async fn test_execute_unreachable_is_transport_error() {
    let client = ApiClient::from_reqwest(reqwest::Client::new());
    let base = Url::parse("http://127.0.0.1:9").unwrap();

    let err = client
        .execute(&base, None, &ApiRequest::get("/api/companies"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {err:?}");
}

// ── Event stream ────────────────────────────────────────────────────

#[tokio::test]
async fn test_open_events_scoped() {
    let (server, client, base) = setup().await;

    let body = "event: connected\ndata: {\"channel\":\"7\"}\n\n\
                event: sync_complete\ndata: {\"company_id\":7,\"company_name\":\"Acme\",\"records\":42,\"synced_at\":\"2026-02-17T10:00:00\"}\n\n\
                event: heartbeat\ndata: {}\n\n";

    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(query_param("company_id", "7"))
        .and(header("X-API-Key", "k-7"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stream = client
        .open_events(&base, Some(&key("k-7")), Some(7))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = stream.map(Result::unwrap).collect().await;

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        StreamEvent::Connected {
            channel: Some("7".into())
        }
    );
    match &events[1] {
        StreamEvent::SyncComplete(payload) => {
            assert_eq!(payload.records, 42);
            assert_eq!(payload.company_name, "Acme");
        }
        other => panic!("expected sync_complete, got {other:?}"),
    }
    assert_eq!(events[2], StreamEvent::Heartbeat);
}

#[tokio::test]
async fn test_open_events_rejected_key() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.open_events(&base, None, None).await.unwrap_err();
    assert!(err.is_unauthorized(), "got {err:?}");
}
