//! Health check endpoints
//!
//! Liveness, readiness, and Prometheus exposition for operators.

use crate::metrics::{self, UplinkMetrics};
use crate::shard::ShardRegistry;
use crate::status::PollerHealth;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub poller_ready: bool,
    pub nodes_connected: u64,
    pub api_ping_ms: i64,
    pub shards_total: usize,
    pub shards_connected: usize,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub registry: ShardRegistry,
    pub poller: Arc<PollerHealth>,
    pub metrics: Arc<UplinkMetrics>,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if the process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness endpoint - 200 when the poller has started and the shard
/// sessions (if any are configured) hold at least one open session
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let poller_ready = state.poller.is_ready();
    let is_ready = poller_ready && state.registry.is_ready();

    let response = ReadyResponse {
        ready: is_ready,
        poller_ready,
        nodes_connected: state.poller.connected(),
        api_ping_ms: state.poller.api_ping_ms(),
        shards_total: state.registry.shard_count(),
        shards_connected: state.registry.connected_shards(),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - Prometheus exposition format
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    metrics::set_shards_connected(state.registry.connected_shards());
    metrics::set_nodes_connected(state.poller.connected() as usize);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
