//! Import batches and normalized statement rows.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::PaymentMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// One already-parsed bank statement line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRow {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub direction: Direction,
    #[serde(default)]
    pub payer: String,
    #[serde(default)]
    pub purpose: String,
    pub bank_reference: Option<String>,
}

/// One already-parsed line of a payment register (cash desk, acquiring export).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRow {
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub payer: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    Statement,
    PaymentRegister,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTotals {
    pub total: usize,
    pub imported: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
    pub duplicates: usize,
    pub skipped_out: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Absent when nothing new was imported.
    pub batch_id: Option<Uuid>,
    pub totals: ImportTotals,
    pub errors: Vec<RowError>,
}

/// Everything one import created, so it can be rolled back as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub source: ImportSource,
    pub fingerprints: BTreeSet<String>,
    pub payment_ids: Vec<Uuid>,
    pub totals: ImportTotals,
    pub created_by: String,
    pub created_utc: DateTime<Utc>,
    pub rolled_back_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub batch_id: Uuid,
    pub voided_payments: usize,
    pub reversed_allocations: usize,
}
