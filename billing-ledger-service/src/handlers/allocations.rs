//! Allocation handlers.

use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::{AutoAllocateBody, ManualAllocateRequest, UnapplyRequest};
use crate::middleware::{Actor, ValidatedJson};
use crate::services::MutationContext;
use crate::startup::AppState;

/// Plan an auto-allocation without writing it.
pub async fn preview_allocation(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AutoAllocateBody>,
) -> Result<impl IntoResponse, AppError> {
    let (request, _) = req.into_parts();
    Ok(Json(state.ledger.preview_allocation(&request)))
}

/// Allocate matched payments to their plots' oldest open charges.
pub async fn auto_allocate(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<AutoAllocateBody>,
) -> Result<impl IntoResponse, AppError> {
    let (request, reason) = req.into_parts();
    let ctx = MutationContext::with_optional_reason(actor, reason);
    Ok(Json(state.ledger.auto_allocate(&request, &ctx)?))
}

pub async fn manual_allocate(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<ManualAllocateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    let summary = state
        .ledger
        .manual_allocate(req.payment_id, req.charge_id, req.amount, &ctx)?;
    Ok(Json(summary))
}

/// Reverse one allocation, or every open allocation of a payment.
pub async fn unapply(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<UnapplyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let target = req
        .target()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Nothing to unapply")))?;
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.unapply(target, &ctx)?))
}
