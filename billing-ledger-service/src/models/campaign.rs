//! Notification campaigns and payment receipts.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BillingMonth, PaymentMethod};

/// Who a campaign is sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CampaignAudience {
    /// Fixed recipient addresses; `{plot}` and `{debt}` render empty.
    Recipients { recipients: Vec<String> },
    /// Every plot with a contact whose total debt is at least `min_debt`.
    Debtors { min_debt: Decimal },
}

/// A templated message. `{plot}` and `{debt}` are substituted per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub template: String,
    pub audience: CampaignAudience,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub attempted: usize,
    pub sent: usize,
    /// Delivered by an earlier attempt of the same job and not sent again.
    #[serde(default)]
    pub already_sent: usize,
    pub failed: Vec<DeliveryFailure>,
}

/// Plain-text receipt for one payment. Storing or printing it is external.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub payment_id: Uuid,
    pub number: String,
    pub paid_on: NaiveDate,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub body: String,
    pub issued_utc: DateTime<Utc>,
}

/// Debt position of one plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotDebt {
    pub plot_id: Uuid,
    pub number: String,
    pub charge_debt: Decimal,
    pub penalty_debt: Decimal,
    pub total_debt: Decimal,
    pub oldest_open_month: Option<BillingMonth>,
}
