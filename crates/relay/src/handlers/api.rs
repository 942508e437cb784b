//! HTTP API served on the API hostname

use crate::channel::WebSocketChannel;
use crate::handshake::{ClaimedIdentity, HandshakeOutcome, PendingHandshake, RelayHandshake};
use crate::registry::RelayRegistry;
use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spacekit_core::tracing::metrics;
use spacekit_core::tracing::prometheus::export_prometheus;
use std::time::Instant;
use tracing::{debug, instrument};

/// Shared state for the API routes
#[derive(Clone)]
pub struct ApiState {
    pub registry: RelayRegistry,
    pub handshake: RelayHandshake,
    pub started_at: Instant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub relays: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelaySummary {
    pub hostname: String,
    pub user_id: String,
    pub connected_at: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListRelaysResponse {
    pub relays: Vec<RelaySummary>,
    pub total: usize,
}

pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/relay", get(handle_relay_upgrade))
        .route("/status", get(handle_status))
        .route("/relays", get(list_relays))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

/// Upgrade to WebSocket, then run the relay handshake over the new channel
#[instrument(name = "relay_upgrade", skip_all)]
async fn handle_relay_upgrade(
    State(state): State<ApiState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = ClaimedIdentity::from_headers(&headers);
    debug!(?identity, "Relay upgrade requested");

    ws.on_upgrade(move |socket| async move {
        let channel = WebSocketChannel::spawn(socket);
        match state
            .handshake
            .run(PendingHandshake::new(identity, channel))
            .await
        {
            HandshakeOutcome::Accepted(relay) => {
                debug!(hostname = %relay.hostname(), "Relay channel live");
            }
            HandshakeOutcome::Rejected(reason) => {
                debug!(reason = reason.kind(), "Relay channel closed after rejection");
            }
        }
    })
}

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        relays: state.registry.len(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn list_relays(State(state): State<ApiState>) -> Json<ListRelaysResponse> {
    let now = Utc::now();
    let relays: Vec<RelaySummary> = state
        .registry
        .list()
        .into_iter()
        .map(|relay| RelaySummary {
            hostname: relay.hostname().to_string(),
            user_id: relay.user_id().to_string(),
            connected_at: relay.connected_at().to_rfc3339(),
            uptime_seconds: (now - relay.connected_at()).num_seconds().max(0) as u64,
        })
        .collect();
    let total = relays.len();

    Json(ListRelaysResponse { relays, total })
}

async fn handle_metrics() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        export_prometheus(metrics::global()),
    )
        .into_response()
}
