use serde::Deserialize;
use validator::Validate;

use crate::models::{PaymentRow, StatementRow};

/// Already-parsed rows of one bank statement file.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportStatementRequest {
    #[validate(length(min = 1, max = 10000, message = "A statement must have 1-10000 rows"))]
    pub rows: Vec<StatementRow>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}

/// Already-parsed rows of one payment register export.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportPaymentsRequest {
    #[validate(length(min = 1, max = 10000, message = "A register must have 1-10000 rows"))]
    pub rows: Vec<PaymentRow>,

    #[validate(length(max = 500, message = "Reason is too long"))]
    pub reason: Option<String>,
}
