//! Period close handlers. Months travel in the path as `YYYY-MM`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::middleware::Actor;
use crate::models::BillingMonth;
use crate::services::MutationContext;
use crate::startup::AppState;

fn parse_month(raw: &str) -> Result<BillingMonth, AppError> {
    raw.parse::<BillingMonth>().map_err(AppError::from)
}

/// Close a month and snapshot its aggregates.
pub async fn close_period(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(month): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let month = parse_month(&month)?;
    let record = state
        .ledger
        .close_period(month, &MutationContext::new(actor))?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Open or closed, with the snapshot, current aggregates and drift.
pub async fn period_status(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let month = parse_month(&month)?;
    Ok(Json(state.ledger.period_status(month)))
}

/// Changes made to a closed month, oldest first.
pub async fn post_close_changes(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let month = parse_month(&month)?;
    Ok(Json(state.ledger.post_close_changes(month)))
}
