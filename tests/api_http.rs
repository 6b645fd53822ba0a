// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /, /health, /status, /items, /metrics
// - POST /poll, /start-polling, /stop-polling

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tempfile::TempDir;
use tower::ServiceExt as _; // for `oneshot`

use announcement_tracker::ingest::fetch::StaticFetcher;
use announcement_tracker::{build_app_with, App, TrackerConfig};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

struct Harness {
    app: App,
    fetcher: Arc<StaticFetcher>,
    _dir: TempDir,
}

impl Harness {
    fn router(&self) -> Router {
        self.app.router.clone()
    }
}

/// Build the same Router the binary uses, over a temp database.
fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = TrackerConfig {
        db_path: dir.path().join("api.db"),
        feed_url: "https://feeds.example.test/rss.xml".into(),
        display_limit: 5,
        ..TrackerConfig::default()
    };
    let fetcher = Arc::new(StaticFetcher::new(include_str!("fixtures/announcements.xml")));
    let app = build_app_with(&cfg, fetcher.clone()).expect("build app");
    Harness {
        app,
        fetcher,
        _dir: dir,
    }
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Json) {
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn post(uri: &str, payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

#[tokio::test]
async fn root_and_health_describe_service() {
    let h = harness();

    let (status, v) = send(h.router(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["websocket_endpoint"], "/ws");

    let (status, v) = send(h.router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "healthy");
    assert_eq!(v["polling_active"], false);
    assert_eq!(v["connected_clients"], 0);
}

#[tokio::test]
async fn poll_then_items_sorted_by_timestamp() {
    let h = harness();

    let (status, v) = send(h.router(), post("/poll", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["count"], 12);
    assert_eq!(h.fetcher.calls(), 1);

    let (status, v) = send(h.router(), post("/poll", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["count"], 0, "second poll finds nothing new");

    let (_, v) = send(h.router(), get("/items")).await;
    assert_eq!(v["count"], 12);

    let (_, v) = send(h.router(), get("/items?sort=timestamp&limit=3")).await;
    let titles: Vec<&str> = v["items"]
        .as_array()
        .expect("items array")
        .iter()
        .map(|e| e["title"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(titles.len(), 3);
    assert!(titles[0].starts_with("ACME LTD"), "newest first, got {titles:?}");
    assert!(titles[1].starts_with("BOLT INDUSTRIES"));
    assert!(titles[2].starts_with("CORAL PHARMA"));
    assert!(
        v["items"][0]["formatted_time"].as_str().is_some_and(|s| !s.is_empty()),
        "dated items carry a display time"
    );
    assert!(v["items"][0]["identifier"].is_string(), "entry fields stay top-level");
}

#[tokio::test]
async fn poll_rejects_non_http_url() {
    let h = harness();
    let (status, v) = send(h.router(), post("/poll", json!({ "url": "file:///etc/passwd" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["status"], "error");
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn start_and_stop_polling_round_trip() {
    let h = harness();

    let (status, v) = send(
        h.router(),
        post("/start-polling", json!({ "url": "https://feeds.example.test/other.xml" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "success");

    let (_, v) = send(h.router(), get("/status")).await;
    assert_eq!(v["polling_active"], true);
    assert_eq!(v["url"], "https://feeds.example.test/other.xml");

    let (_, v) = send(h.router(), post("/start-polling", json!({}))).await;
    assert_eq!(v["status"], "warning", "already active");

    let req = Request::builder()
        .method("POST")
        .uri("/stop-polling")
        .body(Body::empty())
        .expect("build POST /stop-polling");
    let (_, v) = send(h.router(), req).await;
    assert_eq!(v["status"], "success");

    let (_, v) = send(h.router(), get("/status")).await;
    assert_eq!(v["polling_active"], false);
}

#[tokio::test]
async fn metrics_endpoint_contains_tracker_series() {
    let h = harness();
    send(h.router(), post("/poll", json!({}))).await;

    let resp = h
        .router()
        .oneshot(get("/metrics"))
        .await
        .expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    for needle in [
        "tracker_polls_total",
        "tracker_new_items_total",
        "tracker_stored_entries",
        "tracker_max_stored",
    ] {
        assert!(text.contains(needle), "missing metric series {needle}");
    }
}
