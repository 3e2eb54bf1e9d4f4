//! Plot registry handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{PlotListParams, ReasonRequest, UpsertPlotRequest};
use crate::middleware::{Actor, ValidatedJson};
use crate::services::MutationContext;
use crate::startup::AppState;

/// Create a plot, or update it when `plot_id` is given.
pub async fn upsert_plot(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<UpsertPlotRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = req.plot_id.is_none();
    let plot = state
        .ledger
        .upsert_plot(req.into(), &MutationContext::new(actor))?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(plot)))
}

/// List plots, archived ones only on request.
pub async fn list_plots(
    State(state): State<AppState>,
    Query(params): Query<PlotListParams>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.list_plots(params.include_archived)))
}

/// Archive a plot so it is no longer matched.
pub async fn archive_plot(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(plot_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReasonRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = MutationContext::with_optional_reason(actor, req.reason);
    Ok(Json(state.ledger.archive_plot(plot_id, &ctx)?))
}

/// Outstanding charge and penalty debt per plot.
pub async fn plot_debts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.ledger.plot_debts()))
}
