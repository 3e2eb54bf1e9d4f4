pub mod imports;
pub mod jobs;
pub mod ledger;
pub mod penalties;
pub mod plots;

pub use imports::{ImportPaymentsRequest, ImportStatementRequest};
pub use jobs::{EnqueueJobRequest, JobListResponse, JobResponse};
pub use ledger::{
    AssignPlotRequest, AutoAllocateBody, CreateChargeRequest, CreatePaymentRequest,
    ManualAllocateRequest, ReasonRequest, UnapplyRequest,
};
pub use penalties::PenaltyRunRequest;
pub use plots::{PlotListParams, UpsertPlotRequest};

use rust_decimal::Decimal;
use validator::ValidationError;

use crate::services::penalty::MAX_PENALTY_RATE;

pub(crate) fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        let mut err = ValidationError::new("positive_amount");
        err.message = Some("Amount must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

pub(crate) fn penalty_rate(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > MAX_PENALTY_RATE {
        let mut err = ValidationError::new("penalty_rate");
        err.message = Some(format!("Rate must lie between 0 and {}", MAX_PENALTY_RATE).into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_must_be_positive() {
        assert!(positive_amount(&Decimal::new(1, 2)).is_ok());
        assert!(positive_amount(&Decimal::ZERO).is_err());
        assert!(positive_amount(&Decimal::new(-5, 0)).is_err());
    }

    #[test]
    fn penalty_rate_is_bounded() {
        assert!(penalty_rate(&Decimal::ZERO).is_ok());
        assert!(penalty_rate(&MAX_PENALTY_RATE).is_ok());
        assert!(penalty_rate(&Decimal::new(-1, 3)).is_err());
        assert!(penalty_rate(&Decimal::MAX).is_err());
    }
}
