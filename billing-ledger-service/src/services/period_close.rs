//! Period close: monthly snapshots and drift against them.

use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    BillingMonth, EntityType, PeriodAggregates, PeriodCloseRecord, PeriodDrift, PeriodStatus,
    PeriodStatusView, PostCloseChange,
};
use crate::services::clock::Clock;
use crate::services::guard::MutationContext;
use crate::services::store::{LedgerState, LedgerStore};

/// Aggregates of one month as the ledger stands now.
///
/// Paid and debt totals count payments dated in the month, so voiding one of
/// them moves the month's debt back up.
pub fn aggregates(state: &LedgerState, month: BillingMonth) -> PeriodAggregates {
    let mut accrued_total = Decimal::ZERO;
    let mut plot_balances: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for charge in state.charges().filter(|c| c.month == month) {
        accrued_total += charge.amount_accrued;
        *plot_balances.entry(charge.plot_id).or_default() +=
            charge.amount_accrued - charge.amount_paid;
    }

    let mut paid_total = Decimal::ZERO;
    let mut payment_count = 0u64;
    for payment in state
        .payments()
        .filter(|p| !p.is_voided && month.contains(p.paid_on))
    {
        paid_total += payment.amount;
        payment_count += 1;
    }

    let penalty_total = state
        .penalties()
        .filter(|p| p.month == month && p.counts_towards_debt())
        .map(|p| p.amount)
        .sum();

    PeriodAggregates {
        accrued_total,
        paid_total,
        debt_total: accrued_total - paid_total,
        penalty_total,
        payment_count,
        debtor_count: plot_balances.values().filter(|b| **b > Decimal::ZERO).count() as u64,
    }
}

pub struct PeriodCloseManager<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> PeriodCloseManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self, ctx), fields(%month, actor = %ctx.actor))]
    pub fn close(&self, month: BillingMonth, ctx: &MutationContext) -> LedgerResult<PeriodCloseRecord> {
        let now = self.clock.now();
        let record = self.store.transact("close_period", ctx, |state| {
            if state.is_closed(month) {
                return Err(LedgerError::AlreadyClosed { month });
            }
            let record = PeriodCloseRecord {
                month,
                status: PeriodStatus::Closed,
                snapshot: aggregates(state, month),
                closed_utc: now,
                closed_by: ctx.actor.clone(),
            };
            state.insert_close_record(record.clone());
            state.audit(
                EntityType::Period,
                month,
                "close_period",
                ctx,
                json!({ "snapshot": record.snapshot }),
                now,
            );
            Ok(record)
        })?;

        info!(
            debt_total = %record.snapshot.debt_total,
            debtors = record.snapshot.debtor_count,
            "Period closed"
        );
        Ok(record)
    }

    pub fn status(&self, month: BillingMonth) -> PeriodStatusView {
        let state = self.store.snapshot();
        let current = aggregates(&state, month);
        match state.close_record(month) {
            Some(record) => PeriodStatusView {
                month,
                status: PeriodStatus::Closed,
                snapshot: Some(record.snapshot.clone()),
                drift: Some(current.drift_from(&record.snapshot)),
                current,
                closed_utc: Some(record.closed_utc),
                closed_by: Some(record.closed_by.clone()),
            },
            None => PeriodStatusView {
                month,
                status: PeriodStatus::Open,
                snapshot: None,
                current,
                drift: None,
                closed_utc: None,
                closed_by: None,
            },
        }
    }

    /// `current - snapshot` for a closed month. Informational only.
    pub fn drift(&self, month: BillingMonth) -> LedgerResult<PeriodDrift> {
        self.status(month)
            .drift
            .ok_or_else(|| LedgerError::not_found("period close record", month))
    }

    /// Post-close changes of a month in the order they were made.
    pub fn changes(&self, month: BillingMonth) -> Vec<PostCloseChange> {
        self.store
            .snapshot()
            .post_close_changes()
            .iter()
            .filter(|c| c.month == month)
            .cloned()
            .collect()
    }
}
