//! Request bodies for charges, payments and allocations.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::positive_amount;
use crate::models::{
    AutoAllocateRequest, BillingMonth, ChargeCategory, NewCharge, NewPayment, PaymentMethod,
    UnapplyTarget,
};

/// Body of the endpoints that only carry a justification.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReasonRequest {
    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateChargeRequest {
    pub plot_id: Uuid,
    pub month: BillingMonth,
    pub category: ChargeCategory,

    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,

    #[validate(length(max = 500, message = "Note is too long"))]
    pub note: Option<String>,

    pub due_date: Option<NaiveDate>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

impl CreateChargeRequest {
    pub fn into_parts(self) -> (NewCharge, Option<String>) {
        let charge = NewCharge {
            plot_id: self.plot_id,
            month: self.month,
            category: self.category,
            amount: self.amount,
            note: self.note,
            due_date: self.due_date,
        };
        (charge, self.reason)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,

    pub paid_on: NaiveDate,

    #[validate(length(max = 200, message = "Payer is too long"))]
    #[serde(default)]
    pub payer: String,

    #[validate(length(max = 500, message = "Purpose is too long"))]
    #[serde(default)]
    pub purpose: String,

    #[serde(default)]
    pub method: PaymentMethod,

    #[validate(length(min = 1, max = 64, message = "Bank reference must be 1-64 characters"))]
    pub bank_reference: Option<String>,

    pub plot_id: Option<Uuid>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

impl CreatePaymentRequest {
    pub fn into_parts(self) -> (NewPayment, Option<String>) {
        let payment = NewPayment {
            amount: self.amount,
            paid_on: self.paid_on,
            payer: self.payer,
            purpose: self.purpose,
            method: self.method,
            bank_reference: self.bank_reference,
            plot_id: self.plot_id,
        };
        (payment, self.reason)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignPlotRequest {
    pub plot_id: Uuid,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct AutoAllocateBody {
    #[validate(length(min = 1, message = "payment_ids must not be empty when given"))]
    pub payment_ids: Option<Vec<Uuid>>,

    pub plot_id: Option<Uuid>,

    pub through: Option<BillingMonth>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

impl AutoAllocateBody {
    pub fn into_parts(self) -> (AutoAllocateRequest, Option<String>) {
        let request = AutoAllocateRequest {
            payment_ids: self.payment_ids,
            plot_id: self.plot_id,
            through: self.through,
        };
        (request, self.reason)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManualAllocateRequest {
    pub payment_id: Uuid,
    pub charge_id: Uuid,

    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

/// Exactly one of `payment_id` and `allocation_id` must be set.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "one_unapply_target"))]
pub struct UnapplyRequest {
    pub payment_id: Option<Uuid>,
    pub allocation_id: Option<Uuid>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

impl UnapplyRequest {
    pub fn target(&self) -> Option<UnapplyTarget> {
        match (self.payment_id, self.allocation_id) {
            (Some(id), None) => Some(UnapplyTarget::Payment(id)),
            (None, Some(id)) => Some(UnapplyTarget::Allocation(id)),
            _ => None,
        }
    }
}

fn one_unapply_target(req: &UnapplyRequest) -> Result<(), ValidationError> {
    if req.target().is_none() {
        let mut err = ValidationError::new("unapply_target");
        err.message = Some("Give exactly one of payment_id or allocation_id".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unapply_needs_exactly_one_target() {
        let both = UnapplyRequest {
            payment_id: Some(Uuid::new_v4()),
            allocation_id: Some(Uuid::new_v4()),
            reason: None,
        };
        assert!(both.validate().is_err());

        let neither = UnapplyRequest {
            payment_id: None,
            allocation_id: None,
            reason: None,
        };
        assert!(neither.validate().is_err());

        let id = Uuid::new_v4();
        let one = UnapplyRequest {
            payment_id: None,
            allocation_id: Some(id),
            reason: None,
        };
        assert!(one.validate().is_ok());
        assert_eq!(one.target(), Some(UnapplyTarget::Allocation(id)));
    }

    #[test]
    fn charge_amount_must_be_positive() {
        let body = serde_json::json!({
            "plot_id": Uuid::new_v4(),
            "month": "2025-01",
            "category": "membership",
            "amount": "0"
        });
        let req: CreateChargeRequest = serde_json::from_value(body).unwrap();
        assert!(req.validate().is_err());
    }
}
