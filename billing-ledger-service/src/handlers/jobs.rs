//! Background job handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{EnqueueJobRequest, JobListResponse, JobResponse};
use crate::middleware::{Actor, ValidatedJson};
use crate::startup::AppState;

/// Queue a job; the body is its tagged payload.
pub async fn enqueue_job(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(req): ValidatedJson<EnqueueJobRequest>,
) -> Result<impl IntoResponse, AppError> {
    let job = state.jobs.enqueue(req.payload, &actor)?;
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}

/// All jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let jobs: Vec<JobResponse> = state.jobs.list().into_iter().map(JobResponse::from).collect();
    Ok(Json(JobListResponse {
        total: jobs.len(),
        jobs,
    }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(JobResponse::from(state.jobs.get(job_id)?)))
}

/// Re-queue a failed job with a fresh attempt budget.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let job = state.jobs.retry(job_id)?;
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}
