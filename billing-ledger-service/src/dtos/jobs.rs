use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::penalty_rate;
use crate::models::{CampaignAudience, JobPayload, JobResult, JobStatus, JobType, OfficeJob};

/// The body is the tagged payload itself, e.g.
/// `{"type": "close_period", "month": "2025-01"}`.
#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueJobRequest {
    #[serde(flatten)]
    #[validate(custom(function = "validate_payload"))]
    pub payload: JobPayload,
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_payload(payload: &JobPayload) -> Result<(), ValidationError> {
    match payload {
        JobPayload::ImportStatement { rows, .. } if rows.is_empty() => {
            Err(invalid("rows", "A statement must have at least one row"))
        }
        JobPayload::ImportPayments { rows, .. } if rows.is_empty() => {
            Err(invalid("rows", "A register must have at least one row"))
        }
        JobPayload::ApplyPenalty { run, .. } | JobPayload::RecalcPenalty { run, .. } => {
            penalty_rate(&run.daily_rate)
        }
        JobPayload::GenerateReceipts { payment_ids } if payment_ids.is_empty() => {
            Err(invalid("payment_ids", "At least one payment is required"))
        }
        JobPayload::SendCampaign { campaign } => {
            if campaign.template.trim().is_empty() {
                return Err(invalid("template", "Campaign template is required"));
            }
            match &campaign.audience {
                CampaignAudience::Recipients { recipients } if recipients.is_empty() => {
                    Err(invalid("recipients", "At least one recipient is required"))
                }
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub requested_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub next_attempt_at: Option<String>,
}

impl From<OfficeJob> for JobResponse {
    fn from(job: OfficeJob) -> Self {
        Self {
            job_id: job.job_id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            result: job.result,
            error: job.error,
            requested_by: job.requested_by,
            created_at: job.created_utc.to_rfc3339(),
            updated_at: job.updated_utc.to_rfc3339(),
            next_attempt_at: job.next_attempt_utc.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_payload_is_validated() {
        let req: EnqueueJobRequest = serde_json::from_value(serde_json::json!({
            "type": "generate_receipts",
            "payment_ids": []
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: EnqueueJobRequest = serde_json::from_value(serde_json::json!({
            "type": "close_period",
            "month": "2025-01"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.payload.job_type(), JobType::ClosePeriod);
    }
}
