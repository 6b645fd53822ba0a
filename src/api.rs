// src/api.rs
//! HTTP + WebSocket surface over the tracker and its poll scheduler.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

use crate::config::TrackerConfig;
use crate::entry::Entry;
use crate::ingest::scheduler::{now_iso, PollOutcome, PollScheduler};
use crate::timestamp::{for_display, sort_for_display, DisplayEntry};

#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<PollScheduler>,
    display_limit: usize,
}

impl AppState {
    pub fn new(scheduler: Arc<PollScheduler>, cfg: &TrackerConfig) -> Self {
        Self {
            scheduler,
            display_limit: cfg.display_limit.max(1),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/items", get(items))
        .route("/status", get(status))
        .route("/start-polling", post(start_polling))
        .route("/stop-polling", post(stop_polling))
        .route("/poll", post(poll_now))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ItemsResponse {
    items: Vec<DisplayEntry>,
    count: usize,
}

impl From<Vec<Entry>> for ItemsResponse {
    fn from(items: Vec<Entry>) -> Self {
        Self {
            count: items.len(),
            items: for_display(items, chrono::Utc::now()),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    polling_active: bool,
    connected_clients: usize,
    url: String,
}

#[derive(Deserialize, Default)]
struct ItemsQuery {
    sort: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct UrlRequest {
    #[serde(default)]
    url: Option<String>,
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Announcements Tracker API",
        "websocket_endpoint": "/ws",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": now_iso(),
        "polling_active": state.scheduler.is_active(),
        "connected_clients": state.scheduler.subscriber_count(),
    }))
}

async fn items(State(state): State<AppState>, Query(q): Query<ItemsQuery>) -> Json<ItemsResponse> {
    let all = state.scheduler.tracker().load_initial_items().await;
    let items = match q.sort.as_deref() {
        Some("timestamp") => sort_for_display(&all, q.limit),
        _ => match q.limit {
            Some(n) => all.into_iter().take(n).collect(),
            None => all,
        },
    };
    Json(items.into())
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        polling_active: state.scheduler.is_active(),
        connected_clients: state.scheduler.subscriber_count(),
        url: state.scheduler.url(),
    })
}

/// Requested URL or the current one; rejects anything that is not http(s).
fn resolve_url(state: &AppState, requested: Option<String>) -> Result<String, Response> {
    let url = requested
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| state.scheduler.url());
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "URL must start with http:// or https://", "status": "error" })),
        )
            .into_response())
    }
}

async fn start_polling(State(state): State<AppState>, Json(req): Json<UrlRequest>) -> Response {
    let url = match resolve_url(&state, req.url) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if state.scheduler.is_active() || !state.scheduler.start(url.clone()).await {
        return Json(json!({ "message": "Polling is already active", "status": "warning" }))
            .into_response();
    }
    Json(json!({ "message": "Polling started", "url": url, "status": "success" })).into_response()
}

async fn stop_polling(State(state): State<AppState>) -> Json<Value> {
    if !state.scheduler.stop().await {
        return Json(json!({ "message": "Polling is not active", "status": "warning" }));
    }
    Json(json!({ "message": "Polling stopped", "status": "success" }))
}

/// On-demand cycle; shares the single-flight guard with the scheduler.
async fn poll_now(State(state): State<AppState>, Json(req): Json<UrlRequest>) -> Response {
    let url = match resolve_url(&state, req.url) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    match state.scheduler.poll_once(&url).await {
        PollOutcome::Completed(report) => {
            if let Some(err) = report.fetch_error {
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "message": format!("fetch failed: {err}"), "status": "error" })),
                )
                    .into_response();
            }
            Json(ItemsResponse::from(report.new_items)).into_response()
        }
        PollOutcome::Skipped => (
            StatusCode::CONFLICT,
            Json(json!({ "message": "A poll is already in progress", "status": "warning" })),
        )
            .into_response(),
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, v: &Value) -> bool {
    socket.send(Message::Text(v.to_string().into())).await.is_ok()
}

/// Reply to one client message: ping → pong, get_status → status_response,
/// anything else (including non-JSON) is echoed.
fn reply_to(state: &AppState, text: &str) -> Value {
    let parsed: Option<Value> = serde_json::from_str(text).ok();
    let kind = parsed
        .as_ref()
        .and_then(|v| v.get("type"))
        .and_then(Value::as_str);
    match kind {
        Some("ping") => json!({ "type": "pong", "timestamp": now_iso() }),
        Some("get_status") => json!({
            "type": "status_response",
            "polling_active": state.scheduler.is_active(),
            "connected_clients": state.scheduler.subscriber_count(),
            "url": state.scheduler.url(),
            "timestamp": now_iso(),
        }),
        _ => json!({
            "type": "echo",
            "original_message": parsed.unwrap_or_else(|| Value::String(text.to_string())),
            "timestamp": now_iso(),
        }),
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.scheduler.subscribe();
    tracing::info!(target: "api", clients = state.scheduler.subscriber_count(), "websocket connected");

    let recent = state
        .scheduler
        .tracker()
        .load_recent_items(state.display_limit)
        .await;
    let initial = json!({
        "type": "initial_data",
        "count": recent.len(),
        "items": for_display(recent, chrono::Utc::now()),
        "polling_active": state.scheduler.is_active(),
        "url": state.scheduler.url(),
        "timestamp": now_iso(),
    });
    if !send_json(&mut socket, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let msg = match incoming {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::debug!(target: "api", error = %e, "websocket receive error");
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        let reply = reply_to(&state, text.as_str());
                        if !send_json(&mut socket, &reply).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            ev = events.recv() => {
                match ev {
                    Ok(ev) => {
                        let v = match serde_json::to_value(&ev) {
                            Ok(v) => v,
                            Err(e) => {
                                tracing::warn!(target: "api", error = %e, "event serialization failed");
                                continue;
                            }
                        };
                        if !send_json(&mut socket, &v).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(target: "api", skipped = n, "subscriber lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::info!(target: "api", "websocket closed");
}
