//! Statement and payment-register imports with fingerprint deduplication.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    BillingMonth, Direction, EntityType, ImportBatch, ImportReport, ImportSource, ImportTotals,
    MatchStatus, PaymentMethod, PaymentRow, RollbackSummary, RowError, StatementRow,
};
use crate::services::clock::Clock;
use crate::services::guard::{ensure_mutable, note_change, MutationContext};
use crate::services::matching::{PlotMatcher, PreparedRegistry};
use crate::services::metrics::record_import_rows;
use crate::services::registry::{record_payment, void_payment_in, PaymentDraft};
use crate::services::store::LedgerStore;

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable dedup key for a payment.
///
/// A bank reference wins when present; otherwise the key is a SHA-256 over
/// date, amount and the whitespace-normalized payer and purpose.
pub fn fingerprint(
    date: NaiveDate,
    amount: Decimal,
    payer: &str,
    purpose: &str,
    reference: Option<&str>,
) -> String {
    if let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) {
        return format!("ref:{}", normalize_text(reference));
    }
    let canonical = format!(
        "{}|{}|{}|{}",
        date,
        amount.normalize(),
        normalize_text(payer),
        normalize_text(purpose)
    );
    format!("sha256:{}", hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// A row reduced to what the importer needs.
struct ImportRow {
    date: NaiveDate,
    amount: Decimal,
    incoming: bool,
    payer: String,
    purpose: String,
    method: PaymentMethod,
    reference: Option<String>,
}

impl From<&StatementRow> for ImportRow {
    fn from(row: &StatementRow) -> Self {
        Self {
            date: row.date,
            amount: row.amount,
            incoming: row.direction == Direction::Incoming,
            payer: row.payer.clone(),
            purpose: row.purpose.clone(),
            method: PaymentMethod::Bank,
            reference: row.bank_reference.clone(),
        }
    }
}

impl From<&PaymentRow> for ImportRow {
    fn from(row: &PaymentRow) -> Self {
        Self {
            date: row.date,
            amount: row.amount,
            incoming: true,
            payer: row.payer.clone(),
            purpose: row.purpose.clone(),
            method: row.method,
            reference: row.reference.clone(),
        }
    }
}

pub struct ImportService<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    matcher: PlotMatcher,
}

impl<S: LedgerStore> ImportService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, matcher: PlotMatcher) -> Self {
        Self {
            store,
            clock,
            matcher,
        }
    }

    #[instrument(skip(self, rows, ctx), fields(rows = rows.len(), actor = %ctx.actor))]
    pub fn import_statement(
        &self,
        rows: &[StatementRow],
        ctx: &MutationContext,
    ) -> LedgerResult<ImportReport> {
        let rows: Vec<ImportRow> = rows.iter().map(ImportRow::from).collect();
        self.import(ImportSource::Statement, rows, ctx)
    }

    #[instrument(skip(self, rows, ctx), fields(rows = rows.len(), actor = %ctx.actor))]
    pub fn import_payments(
        &self,
        rows: &[PaymentRow],
        ctx: &MutationContext,
    ) -> LedgerResult<ImportReport> {
        let rows: Vec<ImportRow> = rows.iter().map(ImportRow::from).collect();
        self.import(ImportSource::PaymentRegister, rows, ctx)
    }

    /// Rows that fail validation, or fall into a closed month without a
    /// reason, are reported and skipped; the rest of the file still imports.
    fn import(
        &self,
        source: ImportSource,
        rows: Vec<ImportRow>,
        ctx: &MutationContext,
    ) -> LedgerResult<ImportReport> {
        let now = self.clock.now();
        let report = self.store.transact("import", ctx, |state| {
            let batch_id = Uuid::new_v4();
            let mut totals = ImportTotals {
                total: rows.len(),
                ..ImportTotals::default()
            };
            let mut errors = Vec::new();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut payment_ids = Vec::new();
            // Rows only add payments, so the plot keys hold for the whole file.
            let registry = PreparedRegistry::new(state.plots());

            for (row_index, row) in rows.iter().enumerate() {
                ctx.ensure_live()?;
                if !row.incoming {
                    totals.skipped_out += 1;
                    continue;
                }
                if row.amount <= Decimal::ZERO {
                    errors.push(RowError {
                        row_index,
                        message: format!("amount {} must be positive", row.amount),
                    });
                    continue;
                }
                let fingerprint = fingerprint(
                    row.date,
                    row.amount,
                    &row.payer,
                    &row.purpose,
                    row.reference.as_deref(),
                );
                if state.has_fingerprint(&fingerprint) || seen.contains(&fingerprint) {
                    totals.duplicates += 1;
                    continue;
                }
                let month = BillingMonth::of(row.date);
                if let Err(err) = ensure_mutable(state, [month], ctx) {
                    errors.push(RowError {
                        row_index,
                        message: err.to_string(),
                    });
                    continue;
                }

                let outcome =
                    self.matcher
                        .match_prepared(&registry, &row.payer, &row.purpose, row.amount);
                let payment = record_payment(
                    state,
                    PaymentDraft {
                        amount: row.amount,
                        paid_on: row.date,
                        payer: row.payer.clone(),
                        purpose: row.purpose.clone(),
                        method: row.method,
                        bank_reference: row.reference.clone(),
                        fingerprint: fingerprint.clone(),
                        import_batch_id: Some(batch_id),
                        outcome,
                    },
                    now,
                )?;
                match payment.match_status {
                    MatchStatus::Matched => totals.matched += 1,
                    MatchStatus::Ambiguous => totals.ambiguous += 1,
                    MatchStatus::Unmatched => totals.unmatched += 1,
                }
                totals.imported += 1;
                note_change(state, month, EntityType::Payment, payment.payment_id, "import_payment", ctx, now);
                seen.insert(fingerprint);
                payment_ids.push(payment.payment_id);
            }

            if payment_ids.is_empty() {
                return Ok(ImportReport {
                    batch_id: None,
                    totals,
                    errors,
                });
            }
            state.insert_batch(ImportBatch {
                batch_id,
                source,
                fingerprints: seen,
                payment_ids,
                totals: totals.clone(),
                created_by: ctx.actor.clone(),
                created_utc: now,
                rolled_back_utc: None,
            });
            state.audit(
                EntityType::ImportBatch,
                batch_id,
                "import",
                ctx,
                json!({ "totals": totals, "errors": errors.len() }),
                now,
            );
            Ok(ImportReport {
                batch_id: Some(batch_id),
                totals,
                errors,
            })
        })?;

        record_import_rows("imported", report.totals.imported);
        record_import_rows("duplicate", report.totals.duplicates);
        record_import_rows("skipped_out", report.totals.skipped_out);
        record_import_rows("error", report.errors.len());
        if !report.errors.is_empty() {
            warn!(errors = report.errors.len(), "Import finished with row errors");
        }
        info!(
            batch_id = ?report.batch_id,
            imported = report.totals.imported,
            duplicates = report.totals.duplicates,
            matched = report.totals.matched,
            "Import committed"
        );
        Ok(report)
    }

    /// Void every payment a batch created. Fingerprints stay registered, so
    /// importing the same file again is still deduplicated.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn rollback(&self, batch_id: Uuid, ctx: &MutationContext) -> LedgerResult<RollbackSummary> {
        ctx.require_reason("roll back an import")?;
        let now = self.clock.now();
        let summary = self.store.transact("rollback_import", ctx, |state| {
            let batch = state.import_batch(batch_id)?;
            if batch.rolled_back_utc.is_some() {
                return Err(LedgerError::InvalidTransition {
                    entity: "import batch",
                    action: "roll back",
                    status: "rolled_back",
                });
            }
            let payment_ids = batch.payment_ids.clone();

            let mut summary = RollbackSummary {
                batch_id,
                ..RollbackSummary::default()
            };
            for payment_id in payment_ids {
                if state.payment(payment_id)?.is_voided {
                    continue;
                }
                summary.reversed_allocations += void_payment_in(state, payment_id, ctx, now)?;
                summary.voided_payments += 1;
            }
            state.batch_mut(batch_id)?.rolled_back_utc = Some(now);
            state.audit(
                EntityType::ImportBatch,
                batch_id,
                "rollback_import",
                ctx,
                json!({
                    "voided_payments": summary.voided_payments,
                    "reversed_allocations": summary.reversed_allocations,
                }),
                now,
            );
            Ok(summary)
        })?;

        info!(
            voided = summary.voided_payments,
            reversed = summary.reversed_allocations,
            "Import rolled back"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn bank_reference_wins() {
        let a = fingerprint(date(), Decimal::new(5000, 0), "A", "x", Some(" TX-1 "));
        let b = fingerprint(date(), Decimal::new(1, 0), "B", "y", Some("tx-1"));
        assert_eq!(a, "ref:tx-1");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_ignores_formatting_noise() {
        let a = fingerprint(date(), Decimal::new(500000, 2), "Ivan  Petrov", "Plot 12", None);
        let b = fingerprint(date(), Decimal::new(5000, 0), "ivan petrov", " plot 12 ", None);
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
    }

    #[test]
    fn content_hash_distinguishes_amounts() {
        let a = fingerprint(date(), Decimal::new(5000, 0), "Ivan", "Plot 12", None);
        let b = fingerprint(date(), Decimal::new(5001, 0), "Ivan", "Plot 12", None);
        assert_ne!(a, b);
    }
}
