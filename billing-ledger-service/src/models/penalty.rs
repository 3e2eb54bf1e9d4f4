//! Penalty accruals and their freeze/void lifecycle.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BillingMonth, ChargeCategory};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyStatus {
    Active,
    Frozen,
    Voided,
}

impl PenaltyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Voided => "voided",
        }
    }
}

/// Inputs that produced a penalty amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyComputation {
    pub as_of: NaiveDate,
    pub daily_rate: Decimal,
    pub base_debt: Decimal,
    pub days_overdue: i64,
    pub policy_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyAccrual {
    pub penalty_id: Uuid,
    pub plot_id: Uuid,
    pub period_id: Uuid,
    pub month: BillingMonth,
    pub amount: Decimal,
    pub status: PenaltyStatus,
    pub computation: PenaltyComputation,
    pub status_reason: Option<String>,
    pub status_actor: Option<String>,
    pub status_changed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl PenaltyAccrual {
    /// Frozen accruals still count as debt; voided ones never do.
    pub fn counts_towards_debt(&self) -> bool {
        self.status != PenaltyStatus::Voided
    }

    pub fn freeze(&mut self, reason: &str, actor: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        match self.status {
            PenaltyStatus::Active => {
                self.mark(PenaltyStatus::Frozen, Some(reason), actor, at);
                Ok(())
            }
            other => Err(self.invalid("freeze", other)),
        }
    }

    pub fn unfreeze(&mut self, actor: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        match self.status {
            PenaltyStatus::Frozen => {
                self.mark(PenaltyStatus::Active, None, actor, at);
                Ok(())
            }
            other => Err(self.invalid("unfreeze", other)),
        }
    }

    /// Voiding is terminal.
    pub fn void(&mut self, reason: &str, actor: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        match self.status {
            PenaltyStatus::Active | PenaltyStatus::Frozen => {
                self.mark(PenaltyStatus::Voided, Some(reason), actor, at);
                Ok(())
            }
            other => Err(self.invalid("void", other)),
        }
    }

    fn mark(&mut self, status: PenaltyStatus, reason: Option<&str>, actor: &str, at: DateTime<Utc>) {
        self.status = status;
        self.status_reason = reason.map(str::to_string);
        self.status_actor = Some(actor.to_string());
        self.status_changed_utc = Some(at);
        self.updated_utc = at;
    }

    fn invalid(&self, action: &'static str, status: PenaltyStatus) -> LedgerError {
        LedgerError::InvalidTransition {
            entity: "penalty accrual",
            action,
            status: status.as_str(),
        }
    }
}

/// Parameters of a preview/apply/recalc run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyRun {
    pub as_of: NaiveDate,
    pub daily_rate: Decimal,
    pub policy_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPreviewRow {
    pub plot_id: Uuid,
    pub period_id: Uuid,
    pub month: BillingMonth,
    pub category: ChargeCategory,
    pub due_date: NaiveDate,
    pub base_debt: Decimal,
    pub days_overdue: i64,
    pub daily_rate: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltySummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_existing: usize,
    pub skipped_frozen: usize,
    pub skipped_voided: usize,
    pub skipped_zero_debt: usize,
    pub penalty_ids: Vec<Uuid>,
}
