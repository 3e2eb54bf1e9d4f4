//! Period close records, snapshots and post-close change tracking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BillingMonth, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    Closed,
}

/// Aggregates of one calendar month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodAggregates {
    pub accrued_total: Decimal,
    pub paid_total: Decimal,
    pub debt_total: Decimal,
    pub penalty_total: Decimal,
    pub payment_count: u64,
    pub debtor_count: u64,
}

impl PeriodAggregates {
    /// `self - snapshot` for every aggregate.
    pub fn drift_from(&self, snapshot: &PeriodAggregates) -> PeriodDrift {
        PeriodDrift {
            accrued_total: self.accrued_total - snapshot.accrued_total,
            paid_total: self.paid_total - snapshot.paid_total,
            debt_total: self.debt_total - snapshot.debt_total,
            penalty_total: self.penalty_total - snapshot.penalty_total,
            payment_count: self.payment_count as i64 - snapshot.payment_count as i64,
            debtor_count: self.debtor_count as i64 - snapshot.debtor_count as i64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodDrift {
    pub accrued_total: Decimal,
    pub paid_total: Decimal,
    pub debt_total: Decimal,
    pub penalty_total: Decimal,
    pub payment_count: i64,
    pub debtor_count: i64,
}

impl PeriodDrift {
    pub fn is_zero(&self) -> bool {
        *self == PeriodDrift::default()
    }
}

/// Written once when a month is closed; the snapshot is never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodCloseRecord {
    pub month: BillingMonth,
    pub status: PeriodStatus,
    pub snapshot: PeriodAggregates,
    pub closed_utc: DateTime<Utc>,
    pub closed_by: String,
}

/// A mutation that touched a closed month, with its justification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCloseChange {
    pub seq: u64,
    pub month: BillingMonth,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: String,
    pub reason: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodStatusView {
    pub month: BillingMonth,
    pub status: PeriodStatus,
    pub snapshot: Option<PeriodAggregates>,
    pub current: PeriodAggregates,
    pub drift: Option<PeriodDrift>,
    pub closed_utc: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
}
