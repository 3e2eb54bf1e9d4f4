//! Allocation ledger edges between payments and charges.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BillingMonth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    Auto,
    Manual,
    Reversal,
}

impl AllocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Reversal => "reversal",
        }
    }
}

/// One entry of the append-only allocation log.
///
/// Original entries carry a positive amount. Unapplying writes a reversal
/// entry with the negated amount that points back at the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: Uuid,
    pub payment_id: Uuid,
    pub charge_id: Uuid,
    pub amount: Decimal,
    pub kind: AllocationKind,
    pub reverses_allocation_id: Option<Uuid>,
    pub reason: Option<String>,
    pub actor: String,
    pub seq: u64,
    pub created_utc: DateTime<Utc>,
}

impl Allocation {
    pub fn is_reversal(&self) -> bool {
        self.reverses_allocation_id.is_some()
    }
}

/// Selects which payments an auto-allocation run draws from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoAllocateRequest {
    /// Restrict to these payments; `None` means every eligible payment.
    pub payment_ids: Option<Vec<Uuid>>,
    /// Restrict to payments matched to this plot.
    pub plot_id: Option<Uuid>,
    /// Leave charges of later months untouched.
    pub through: Option<BillingMonth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "id", rename_all = "snake_case")]
pub enum UnapplyTarget {
    Payment(Uuid),
    Allocation(Uuid),
}

/// One proposed or executed payment→charge transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub payment_id: Uuid,
    pub charge_id: Uuid,
    pub plot_id: Uuid,
    pub month: BillingMonth,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub updated_count: usize,
    pub charges_affected: usize,
    pub total_allocated: Decimal,
    pub allocation_ids: Vec<Uuid>,
    /// Closed months this call changed under a reason.
    pub post_close_months: Vec<BillingMonth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationPreview {
    pub updated_count: usize,
    pub total_allocated: Decimal,
    pub lines: Vec<AllocationLine>,
}
