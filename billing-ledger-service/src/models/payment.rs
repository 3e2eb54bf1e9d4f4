//! Payment receipts and their match/allocation state.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Unmatched,
    Ambiguous,
    Matched,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Ambiguous => "ambiguous",
            Self::Matched => "matched",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Unallocated,
    Partial,
    Allocated,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::Partial => "partial",
            Self::Allocated => "allocated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Bank,
    Cash,
    Card,
    Online,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Online => "online",
            Self::Other => "other",
        }
    }
}

/// A money receipt.
///
/// `allocated_amount` and `remaining_amount` are derived from the allocation
/// log; `allocated_amount + remaining_amount == amount` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub payer: String,
    pub purpose: String,
    pub method: PaymentMethod,
    pub bank_reference: Option<String>,
    pub fingerprint: String,
    pub import_batch_id: Option<Uuid>,
    pub match_status: MatchStatus,
    pub matched_plot_id: Option<Uuid>,
    pub match_candidates: Vec<Uuid>,
    pub match_confidence: f64,
    pub match_reason: String,
    pub allocation_status: AllocationStatus,
    pub allocated_amount: Decimal,
    pub remaining_amount: Decimal,
    pub auto_allocate_disabled: bool,
    pub is_voided: bool,
    pub void_reason: Option<String>,
    pub voided_utc: Option<DateTime<Utc>>,
    pub seq: u64,
    pub created_utc: DateTime<Utc>,
}

impl Payment {
    /// Refresh the derived totals from the signed allocation sum.
    pub fn apply_allocated(&mut self, allocated: Decimal) {
        self.allocated_amount = allocated;
        self.remaining_amount = self.amount - allocated;
        self.allocation_status = if allocated.is_zero() {
            AllocationStatus::Unallocated
        } else if self.remaining_amount.is_zero() {
            AllocationStatus::Allocated
        } else {
            AllocationStatus::Partial
        };
    }

    /// Whether auto-allocation may draw from this payment.
    pub fn is_auto_allocatable(&self) -> bool {
        !self.is_voided
            && !self.auto_allocate_disabled
            && self.remaining_amount > Decimal::ZERO
            && self.match_status == MatchStatus::Matched
            && self.matched_plot_id.is_some()
    }
}

/// Input for a manually entered payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub payer: String,
    pub purpose: String,
    #[serde(default)]
    pub method: PaymentMethod,
    pub bank_reference: Option<String>,
    /// Skip the matcher and attach the payment to this plot.
    pub plot_id: Option<Uuid>,
}
