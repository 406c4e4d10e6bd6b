//! HTTP routes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_core::ChannelName;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::{ApiError, ApiResult};
use crate::hub::{DispatchError, Hub};
use crate::registry::HubStats;
use crate::transport::WebSocketTransport;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    /// Bearer token required by the admin endpoints; open when `None`
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(hub: Hub, admin_token: Option<String>) -> Self {
        Self {
            hub,
            admin_token: admin_token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/connect", get(ws_connect_handler))
        .route("/api/ws/status", get(status_handler))
        .route("/api/ws/broadcast", post(broadcast_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

// ============================================================================
// WebSocket entry points
// ============================================================================

/// Upgrade first, then authenticate in-band.
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let ws = ws.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let hub = state.hub.clone();

    Ok(ws
        .max_message_size(hub.settings().max_transport_bytes)
        .on_upgrade(move |socket| async move {
            if let Err(e) = hub.accept(WebSocketTransport::new(socket)).await {
                debug!(error = %e, "Connection not admitted");
            }
        }))
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// Verify the query-string token, then upgrade straight into the hub.
async fn ws_connect_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing token".into()))?;

    let user_id = state.hub.verify(&token).await.map_err(|e| {
        info!(error = %e, "Rejected pre-upgrade credential");
        ApiError::Unauthorized(e.to_string())
    })?;

    let ws = ws.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let hub = state.hub.clone();

    Ok(ws
        .max_message_size(hub.settings().max_transport_bytes)
        .on_upgrade(move |socket| async move {
            if let Err(e) = hub
                .register_connection(user_id, WebSocketTransport::new(socket))
                .await
            {
                debug!(%user_id, error = %e, "Connection not admitted");
            }
        }))
}

// ============================================================================
// HTTP API
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub active_connections: usize,
    pub channels: Vec<String>,
    pub stats: HubStats,
}

async fn status_handler(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let status = state
        .hub
        .status()
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    Ok(Json(StatusResponse {
        status: "ok",
        active_connections: status.active_connections,
        channels: status.channels,
        stats: status.stats,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    channels: Vec<String>,
}

async fn broadcast_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&state, &headers)?;

    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.message_type.trim().is_empty() {
        return Err(ApiError::BadRequest("type must not be empty".into()));
    }

    let channels = request
        .channels
        .into_iter()
        .map(ChannelName::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!(
        message_type = %request.message_type,
        channels = channels.len(),
        "Admin broadcast"
    );

    state
        .hub
        .broadcast_to_channels(request.message_type, request.data, channels)
        .map_err(|e| match e {
            DispatchError::QueueFull | DispatchError::HubStopped => {
                ApiError::ServiceUnavailable(e.to_string())
            }
            DispatchError::Encode(_) => ApiError::Internal(e.to_string()),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "ok", "queued": true})),
    ))
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if tokens_match(token, expected) => Ok(()),
        Some(_) => Err(ApiError::Unauthorized("invalid admin token".into())),
        None => Err(ApiError::Unauthorized("missing admin token".into())),
    }
}

/// Compares digests so the running time does not depend on where the
/// tokens first differ, or on the expected token's length.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
