//! Statement and payment-register import handlers.
//!
//! Imports match every row against the registry inside one transaction, so
//! they run on the blocking pool rather than on an async worker.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{ImportPaymentsRequest, ImportStatementRequest, ReasonRequest};
use crate::error::LedgerResult;
use crate::middleware::{Actor, ValidatedJson};
use crate::services::MutationContext;
use crate::startup::{AppState, Ledger};

async fn on_blocking_pool<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Ledger) -> LedgerResult<T> + Send + 'static,
{
    let ledger = state.ledger.clone();
    let outcome = tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Import task failed: {}", e)))?;
    Ok(outcome?)
}

/// Import the rows of one bank statement.
pub async fn import_statement(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<ImportStatementRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    let rows = req.rows;
    let report = on_blocking_pool(&state, move |ledger| ledger.import_statement(&rows, &ctx)).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Import the rows of one payment-register export.
pub async fn import_payments(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<ImportPaymentsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    let rows = req.rows;
    let report = on_blocking_pool(&state, move |ledger| ledger.import_payments(&rows, &ctx)).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Void every payment an import batch created.
pub async fn rollback_import(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(batch_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    let summary = on_blocking_pool(&state, move |ledger| ledger.rollback_import(batch_id, &ctx)).await?;
    Ok(Json(summary))
}
