//! Accrual line items.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BillingMonth, ChargeCategory};

/// An amount billed to one plot for one accrual period.
///
/// `amount_paid` is a cache of the signed allocation sum for this charge and
/// is recomputed from the allocation log after every allocation change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: Uuid,
    pub plot_id: Uuid,
    pub period_id: Uuid,
    pub month: BillingMonth,
    pub category: ChargeCategory,
    pub amount_accrued: Decimal,
    pub amount_paid: Decimal,
    pub note: Option<String>,
    /// Creation order, used to break ties inside a period.
    pub seq: u64,
    pub created_utc: DateTime<Utc>,
}

impl Charge {
    /// Amount still owed; overpaid charges report zero.
    pub fn outstanding(&self) -> Decimal {
        (self.amount_accrued - self.amount_paid).max(Decimal::ZERO)
    }

    pub fn is_open(&self) -> bool {
        self.outstanding() > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCharge {
    pub plot_id: Uuid,
    pub month: BillingMonth,
    pub category: ChargeCategory,
    pub amount: Decimal,
    pub note: Option<String>,
    /// Only used when this charge creates its accrual period.
    pub due_date: Option<NaiveDate>,
}
