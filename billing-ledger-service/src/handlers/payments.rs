//! Charge and payment handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{AssignPlotRequest, CreateChargeRequest, CreatePaymentRequest, ReasonRequest};
use crate::middleware::{Actor, ValidatedJson};
use crate::models::AutoAllocateRequest;
use crate::services::MutationContext;
use crate::startup::AppState;

/// Accrue a charge against a plot for a month.
pub async fn create_charge(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<CreateChargeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (charge, reason) = req.into_parts();
    let ctx = MutationContext::with_optional_reason(actor, reason);
    let charge = state.ledger.create_charge(charge, &ctx)?;
    Ok((StatusCode::CREATED, Json(charge)))
}

/// Record a manual payment and run it through the matcher.
pub async fn create_payment(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (payment, reason) = req.into_parts();
    let ctx = MutationContext::with_optional_reason(actor, reason);
    let payment = state.ledger.create_payment(payment, &ctx)?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.payment(payment_id)?))
}

/// Void a payment, reversing its allocations.
pub async fn void_payment(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(payment_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.void_payment(payment_id, &ctx)?))
}

/// Resolve an ambiguous or unmatched payment to a plot by hand.
pub async fn assign_plot(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(payment_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AssignPlotRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.assign_plot(payment_id, req.plot_id, &ctx)?))
}

/// Auto-allocate a single payment.
pub async fn auto_allocate_payment(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(payment_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = AutoAllocateRequest {
        payment_ids: Some(vec![payment_id]),
        ..Default::default()
    };
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    // Surfaces NotFound instead of an empty summary for an unknown id.
    state.ledger.payment(payment_id)?;
    Ok(Json(state.ledger.auto_allocate(&request, &ctx)?))
}
