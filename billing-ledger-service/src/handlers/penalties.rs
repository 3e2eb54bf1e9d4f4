//! Penalty handlers.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{PenaltyRunRequest, ReasonRequest};
use crate::middleware::{Actor, ValidatedJson};
use crate::services::MutationContext;
use crate::startup::AppState;

/// Compute penalty rows as of a date without persisting them.
pub async fn preview_penalty(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PenaltyRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.preview_penalty(&req.run())?))
}

/// Persist new penalty accruals.
pub async fn apply_penalty(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<PenaltyRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = req.run();
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.apply_penalty(&run, &ctx)?))
}

/// Recompute active accruals against current debt.
pub async fn recalc_penalty(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<PenaltyRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = req.run();
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.recalc_penalty(&run, &ctx)?))
}

pub async fn void_penalty(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(penalty_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.void_penalty(penalty_id, &ctx)?))
}

/// Freeze an accrual so recalculation leaves it alone.
pub async fn freeze_penalty(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(penalty_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.freeze_penalty(penalty_id, &ctx)?))
}

pub async fn unfreeze_penalty(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(penalty_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.unfreeze_penalty(penalty_id, &ctx)?))
}
