//! Asynchronous office jobs and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::{
    AllocationSummary, AutoAllocateRequest, BillingMonth, Campaign, CampaignSummary,
    ImportReport, PaymentRow, PenaltyRun, PenaltySummary, PeriodCloseRecord, Receipt,
    StatementRow,
};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ImportStatement,
    ImportPayments,
    AutoAllocate,
    ApplyPenalty,
    RecalcPenalty,
    ClosePeriod,
    GenerateReceipts,
    SendCampaign,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImportStatement => "import_statement",
            Self::ImportPayments => "import_payments",
            Self::AutoAllocate => "auto_allocate",
            Self::ApplyPenalty => "apply_penalty",
            Self::RecalcPenalty => "recalc_penalty",
            Self::ClosePeriod => "close_period",
            Self::GenerateReceipts => "generate_receipts",
            Self::SendCampaign => "send_campaign",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work description; one variant per job type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    ImportStatement {
        rows: Vec<StatementRow>,
        #[serde(default)]
        reason: Option<String>,
    },
    ImportPayments {
        rows: Vec<PaymentRow>,
        #[serde(default)]
        reason: Option<String>,
    },
    AutoAllocate {
        #[serde(default)]
        request: AutoAllocateRequest,
        reason: Option<String>,
    },
    ApplyPenalty {
        run: PenaltyRun,
        reason: Option<String>,
    },
    RecalcPenalty {
        run: PenaltyRun,
        reason: Option<String>,
    },
    ClosePeriod {
        month: BillingMonth,
    },
    GenerateReceipts {
        payment_ids: Vec<Uuid>,
    },
    SendCampaign {
        campaign: Campaign,
    },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::ImportStatement { .. } => JobType::ImportStatement,
            Self::ImportPayments { .. } => JobType::ImportPayments,
            Self::AutoAllocate { .. } => JobType::AutoAllocate,
            Self::ApplyPenalty { .. } => JobType::ApplyPenalty,
            Self::RecalcPenalty { .. } => JobType::RecalcPenalty,
            Self::ClosePeriod { .. } => JobType::ClosePeriod,
            Self::GenerateReceipts { .. } => JobType::GenerateReceipts,
            Self::SendCampaign { .. } => JobType::SendCampaign,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobResult {
    Import { report: ImportReport },
    Allocation { summary: AllocationSummary },
    Penalty { summary: PenaltySummary },
    PeriodClosed { record: PeriodCloseRecord },
    Receipts { receipts: Vec<Receipt> },
    Campaign { summary: CampaignSummary },
}

/// What the runner should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Retry { delay: Duration },
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeJob {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub payload: JobPayload,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub requested_by: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub started_utc: Option<DateTime<Utc>>,
    pub finished_utc: Option<DateTime<Utc>>,
    pub next_attempt_utc: Option<DateTime<Utc>>,
    /// Campaign recipients already delivered to; kept across attempts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivered: Vec<String>,
}

impl OfficeJob {
    pub const PROGRESS_STARTED: u8 = 5;
    pub const PROGRESS_DONE: u8 = 100;

    pub fn new(
        payload: JobPayload,
        requested_by: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            job_type: payload.job_type(),
            status: JobStatus::Queued,
            progress: 0,
            payload,
            result: None,
            error: None,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            requested_by: requested_by.to_string(),
            created_utc: now,
            updated_utc: now,
            started_utc: None,
            finished_utc: None,
            next_attempt_utc: None,
            delivered: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Failed)
    }

    /// `queued → running`; counts the attempt.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status != JobStatus::Queued {
            return Err(self.invalid("start"));
        }
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.progress = Self::PROGRESS_STARTED;
        self.started_utc = Some(now);
        self.next_attempt_utc = None;
        self.updated_utc = now;
        Ok(())
    }

    pub fn set_progress(&mut self, progress: u8, now: DateTime<Utc>) {
        if self.status == JobStatus::Running {
            self.progress = progress.min(Self::PROGRESS_DONE);
            self.updated_utc = now;
        }
    }

    /// `running → done`.
    pub fn complete(&mut self, result: JobResult, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status != JobStatus::Running {
            return Err(self.invalid("complete"));
        }
        self.status = JobStatus::Done;
        self.progress = Self::PROGRESS_DONE;
        self.result = Some(result);
        self.error = None;
        self.finished_utc = Some(now);
        self.updated_utc = now;
        Ok(())
    }

    /// `running → queued` while attempts remain, otherwise `running → failed`.
    /// The error message is kept either way.
    pub fn fail(
        &mut self,
        error: String,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> Result<JobTransition, LedgerError> {
        if self.status != JobStatus::Running {
            return Err(self.invalid("fail"));
        }
        self.error = Some(error);
        self.updated_utc = now;
        if self.attempts < self.max_attempts {
            self.status = JobStatus::Queued;
            self.next_attempt_utc = chrono::Duration::from_std(backoff)
                .ok()
                .map(|delay| now + delay);
            Ok(JobTransition::Retry { delay: backoff })
        } else {
            self.status = JobStatus::Failed;
            self.finished_utc = Some(now);
            Ok(JobTransition::Failed)
        }
    }

    /// `failed → queued` with a fresh attempt budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status != JobStatus::Failed {
            return Err(self.invalid("retry"));
        }
        self.status = JobStatus::Queued;
        self.attempts = 0;
        self.progress = 0;
        self.result = None;
        self.finished_utc = None;
        self.next_attempt_utc = None;
        self.updated_utc = now;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> LedgerError {
        LedgerError::InvalidTransition {
            entity: "job",
            action,
            status: self.status.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(max_attempts: u32) -> OfficeJob {
        OfficeJob::new(
            JobPayload::GenerateReceipts { payment_ids: vec![] },
            "treasurer",
            max_attempts,
            Utc::now(),
        )
    }

    #[test]
    fn happy_path_reaches_done() {
        let mut job = job(3);
        job.start(Utc::now()).unwrap();
        assert_eq!(job.progress, OfficeJob::PROGRESS_STARTED);
        assert_eq!(job.attempts, 1);

        job.complete(JobResult::Receipts { receipts: vec![] }, Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, 100);
        assert!(job.is_terminal());
    }

    #[test]
    fn failures_retry_until_attempts_exhausted() {
        let mut job = job(2);
        let backoff = Duration::from_millis(500);

        job.start(Utc::now()).unwrap();
        let first = job.fail("boom".to_string(), backoff, Utc::now()).unwrap();
        assert_eq!(first, JobTransition::Retry { delay: backoff });
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.next_attempt_utc.is_some());

        job.start(Utc::now()).unwrap();
        let second = job.fail("boom again".to_string(), backoff, Utc::now()).unwrap();
        assert_eq!(second, JobTransition::Failed);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom again"));
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn requeue_only_from_failed() {
        let mut job = job(1);
        assert!(job.requeue(Utc::now()).is_err());

        job.start(Utc::now()).unwrap();
        job.fail("boom".to_string(), Duration::ZERO, Utc::now()).unwrap();
        job.requeue(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn cannot_start_twice() {
        let mut job = job(3);
        job.start(Utc::now()).unwrap();
        assert!(job.start(Utc::now()).is_err());
    }

    #[test]
    fn payload_is_tagged_by_type() {
        let payload = JobPayload::ClosePeriod {
            month: BillingMonth::new(2025, 1).unwrap(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "close_period");
        assert_eq!(json["month"], "2025-01");
        assert_eq!(payload.job_type(), JobType::ClosePeriod);
    }
}
