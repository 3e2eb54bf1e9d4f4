//! Domain errors for the billing ledger.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::BillingMonth;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("amount {requested} exceeds remaining {remaining} on payment {payment_id}")]
    InsufficientRemaining {
        payment_id: Uuid,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("period {month} is closed; a reason is required to change it")]
    PeriodClosedRequiresReason { month: BillingMonth },

    #[error("period {month} is already closed")]
    AlreadyClosed { month: BillingMonth },

    #[error("cannot {action} {entity} in status {status}")]
    InvalidTransition {
        entity: &'static str,
        action: &'static str,
        status: &'static str,
    },

    #[error("job attempt timed out after {seconds}s")]
    JobTimeout { seconds: u64 },

    #[error("job handler failed: {0}")]
    JobHandler(String),

    #[error("job attempt was abandoned before its changes were committed")]
    AttemptAbandoned,

    #[error("job queue is full")]
    QueueFull,
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::InsufficientRemaining { .. } => "insufficient_remaining",
            Self::PeriodClosedRequiresReason { .. } => "period_closed_requires_reason",
            Self::AlreadyClosed { .. } => "already_closed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::JobTimeout { .. } => "job_timeout",
            Self::JobHandler(_) => "job_handler",
            Self::AttemptAbandoned => "attempt_abandoned",
            Self::QueueFull => "queue_full",
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(_)
            | LedgerError::InsufficientRemaining { .. }
            | LedgerError::InvalidTransition { .. } => AppError::BadRequest(anyhow::anyhow!(err)),
            LedgerError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err)),
            LedgerError::PeriodClosedRequiresReason { .. } | LedgerError::AlreadyClosed { .. } => {
                AppError::Conflict(anyhow::anyhow!(err))
            }
            LedgerError::QueueFull => AppError::ServiceUnavailable,
            LedgerError::JobTimeout { .. }
            | LedgerError::JobHandler(_)
            | LedgerError::AttemptAbandoned => {
                AppError::InternalError(anyhow::anyhow!(err))
            }
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
