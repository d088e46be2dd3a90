//! Axum HTTP channel — a small JSON API next to the chat channels.
//!
//! ```text
//! GET  /api/health            management status (uptime, health, counts)
//! GET  /api/tasks[?status=]   task list
//! POST /api/message           {"content": "..."} → {"reply": "..."}
//! ```
//!
//! Every handler goes through [`CommsState`]; nothing here touches the task
//! store or the bus directly.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::state::CommsState;
use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub(crate) struct HttpState {
    pub channel_id: Arc<str>,
    pub comms: Arc<CommsState>,
}

pub struct HttpChannel {
    channel_id: String,
    bind_addr: String,
    state: Arc<CommsState>,
}

impl HttpChannel {
    pub fn new(channel_id: impl Into<String>, bind_addr: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self { channel_id: channel_id.into(), bind_addr: bind_addr.into(), state }
    }
}

impl Component for HttpChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_http(self.channel_id, self.bind_addr, self.state, shutdown))
    }
}

async fn run_http(
    channel_id: String,
    bind_addr: String,
    comms: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(HttpState { channel_id: Arc::from(channel_id.as_str()), comms });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("http bind failed on {bind_addr}: {e}")))?;
    info!(%channel_id, %bind_addr, "http channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("http server error: {e}")))?;

    info!(%channel_id, "http channel shut down");
    Ok(())
}

pub(crate) fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", get(tasks))
        .route("/api/message", post(message))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TasksQuery {
    status: Option<String>,
}

#[derive(Deserialize)]
struct MessageRequest {
    content: String,
}

fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn raw_json(body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn health(State(state): State<HttpState>) -> Response {
    match tokio::time::timeout(QUERY_TIMEOUT, state.comms.management_status()).await {
        Ok(Ok(body)) => raw_json(body),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "management status failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("management", e)).into_response()
        }
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, json_error("timeout", "management status timed out")).into_response(),
    }
}

async fn tasks(State(state): State<HttpState>, Query(query): Query<TasksQuery>) -> Response {
    let status = query.status.filter(|s| !s.trim().is_empty());
    match tokio::time::timeout(QUERY_TIMEOUT, state.comms.list_tasks(status)).await {
        Ok(Ok(body)) => raw_json(body),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "task listing failed: {e}");
            (StatusCode::BAD_REQUEST, json_error("tasks", e)).into_response()
        }
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, json_error("timeout", "task listing timed out")).into_response(),
    }
}

async fn message(State(state): State<HttpState>, Json(req): Json<MessageRequest>) -> Response {
    if req.content.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, json_error("empty", "content must not be empty")).into_response();
    }
    match tokio::time::timeout(MESSAGE_TIMEOUT, state.comms.send_message(&state.channel_id, req.content)).await {
        Ok(Ok(reply)) => (StatusCode::OK, Json(json!({ "reply": reply }))).into_response(),
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, "message send failed: {e}");
            (StatusCode::BAD_GATEWAY, json_error("internal", e)).into_response()
        }
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, json_error("timeout", "agent request timed out")).into_response(),
    }
}
