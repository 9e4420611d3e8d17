//! Axum HTTP surface: diagnostics and the long-poll transport.

pub mod error;

use crate::relay::{PeerEntry, RelayHandle};
use crate::transport::PollHub;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use error::{ApiError, ApiResult};
use fitrelay_core::{decode_batch, Envelope, RelayError, RelayResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application state
pub struct AppState {
    pub relay: RelayHandle,
    /// `None` when the long-poll fallback is disabled.
    pub polls: Option<Arc<PollHub>>,
    /// Set once the WebSocket listener is bound.
    pub websocket_running: AtomicBool,
    /// Largest accepted long-poll request body.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(relay: RelayHandle, polls: Option<Arc<PollHub>>, max_body_bytes: usize) -> Self {
        Self {
            relay,
            polls,
            websocket_running: AtomicBool::new(false),
            max_body_bytes,
        }
    }

    fn polls(&self) -> ApiResult<&PollHub> {
        self.polls
            .as_deref()
            .ok_or_else(|| ApiError::Unavailable("polling transport disabled".into()))
    }
}

// ─── Route builder ───────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/ping", get(liveness))
        .route("/api/webrtc/status", get(status))
        .route("/api/webrtc/peers", get(peers));

    if state.polls.is_some() {
        let polling = Router::new()
            .route("/relay/poll", post(poll_open))
            .route(
                "/relay/poll/:sid",
                get(poll_recv).post(poll_send).delete(poll_close),
            )
            .layer(DefaultBodyLimit::max(state.max_body_bytes));
        router = router.merge(polling);
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Bind the HTTP port.
pub async fn bind(addr: SocketAddr) -> RelayResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP bind failed on {addr}: {e}")))?;
    info!(addr = %addr, "HTTP listener started");
    Ok(listener)
}

/// Serve on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> RelayResult<()> {
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP server failed: {e}")))
}

// ─── Handlers ────────────────────────────────────────────────────

async fn liveness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = state.relay.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "pythonConnected": snap.python_connected,
        "clientsCount": snap.clients_count,
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = state.relay.snapshot();
    Json(serde_json::json!({
        "pythonServerConnected": snap.python_connected,
        "connectedClients": snap.clients_count,
        "websocketServerRunning": state.websocket_running.load(Ordering::Relaxed),
    }))
}

async fn peers(State(state): State<Arc<AppState>>) -> Json<Vec<PeerEntry>> {
    Json(state.relay.snapshot().peers)
}

async fn poll_open(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let sid = state.polls()?.open().await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "sid": sid }))))
}

async fn poll_send(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    let envelopes = decode_batch(&body)?;
    state.polls()?.push(&sid, envelopes).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn poll_recv(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
) -> ApiResult<Json<Vec<Envelope>>> {
    Ok(Json(state.polls()?.poll(&sid).await?))
}

async fn poll_close(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
) -> ApiResult<StatusCode> {
    state.polls()?.close(&sid).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::policy::OpenClaim;
    use crate::relay::{spawn, RelayState};
    use axum::body::Body;
    use axum::http::Request;
    use fitrelay_core::events;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(polling: bool) -> (Arc<AppState>, Router) {
        let (relay, _task) = spawn(RelayState::new(Box::new(OpenClaim)), 16);
        let polls = polling.then(|| {
            Arc::new(PollHub::new(
                relay.clone(),
                Duration::from_millis(200),
                Duration::from_secs(5),
            ))
        });
        let state = Arc::new(AppState::new(relay, polls, 1024));
        (state.clone(), build_router(state))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn liveness_reports_relay_state() {
        let (_state, router) = app(false);
        let (status, body) = call(&router, "GET", "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pythonConnected"], false);
        assert_eq!(body["clientsCount"], 0);
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn status_tracks_websocket_flag() {
        let (state, router) = app(false);
        let (_, body) = call(&router, "GET", "/api/webrtc/status", "").await;
        assert_eq!(body["websocketServerRunning"], false);
        assert_eq!(body["connectedClients"], 0);

        state.websocket_running.store(true, Ordering::Relaxed);
        let (_, body) = call(&router, "GET", "/api/webrtc/status", "").await;
        assert_eq!(body["websocketServerRunning"], true);
        assert_eq!(body["pythonServerConnected"], false);
    }

    #[tokio::test]
    async fn polling_round_trip_over_http() {
        let (_state, router) = app(true);
        let (status, body) = call(&router, "POST", "/relay/poll", "").await;
        assert_eq!(status, StatusCode::CREATED);
        let sid = body["sid"].as_str().unwrap().to_string();
        let uri = format!("/relay/poll/{sid}");

        let (status, _) = call(
            &router,
            "POST",
            &uri,
            r#"[{"event":"connect-python"},{"event":"ping"}]"#,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&router, "GET", &uri, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["event"], events::PONG);
        assert_eq!(body[0]["data"]["pythonConnected"], true);

        let (_, peers) = call(&router, "GET", "/api/webrtc/peers", "").await;
        assert_eq!(peers[0]["role"], "privileged");

        let (status, _) = call(&router, "DELETE", &uri, "").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&router, "GET", &uri, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn bad_poll_body_is_rejected() {
        let (_state, router) = app(true);
        let (_, body) = call(&router, "POST", "/relay/poll", "").await;
        let uri = format!("/relay/poll/{}", body["sid"].as_str().unwrap());

        let (status, _) = call(&router, "POST", &uri, "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_poll_body_is_rejected() {
        let (_state, router) = app(true);
        let (_, body) = call(&router, "POST", "/relay/poll", "").await;
        let uri = format!("/relay/poll/{}", body["sid"].as_str().unwrap());

        let big = format!(r#"{{"event":"ping","data":"{}"}}"#, "x".repeat(2048));
        let (status, _) = call(&router, "POST", &uri, &big).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (status, _) = call(&router, "POST", &uri, r#"{"event":"ping"}"#).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn polling_routes_absent_when_disabled() {
        let (_state, router) = app(false);
        let (status, _) = call(&router, "POST", "/relay/poll", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
