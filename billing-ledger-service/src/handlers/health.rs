//! Liveness, readiness and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::metrics::get_metrics;
use crate::startup::AppState;

/// Liveness check with the service name, environment and version.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "environment": state.config.common.environment,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once the ledger answers a snapshot read.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let plots = state.ledger.snapshot().plots().count();
    (StatusCode::OK, Json(json!({ "status": "ready", "plots": plots })))
}

/// Prometheus text exposition.
pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
