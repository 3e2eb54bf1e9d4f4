use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use super::penalty_rate;
use crate::models::PenaltyRun;

/// Body of penalty preview, apply and recalc.
#[derive(Debug, Deserialize, Validate)]
pub struct PenaltyRunRequest {
    pub as_of: NaiveDate,

    #[validate(custom(function = "penalty_rate"))]
    pub daily_rate: Decimal,

    #[validate(length(min = 1, max = 64, message = "Policy version must be 1-64 characters"))]
    pub policy_version: Option<String>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

impl PenaltyRunRequest {
    pub fn run(&self) -> PenaltyRun {
        PenaltyRun {
            as_of: self.as_of,
            daily_rate: self.daily_rate,
            policy_version: self.policy_version.clone(),
        }
    }
}
