//! Penalty engine: daily-rate penalties on overdue charge debt.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    BillingMonth, ChargeCategory, EntityType, PenaltyAccrual, PenaltyComputation,
    PenaltyPreviewRow, PenaltyRun, PenaltyStatus, PenaltySummary, PlotDebt,
};
use crate::services::clock::Clock;
use crate::services::guard::{ensure_mutable, note_change, MutationContext};
use crate::services::store::{LedgerState, LedgerStore};

const DAYS_PER_YEAR: i64 = 365;

/// Highest accepted penalty rate (1000% a year).
pub const MAX_PENALTY_RATE: Decimal = Decimal::TEN;

/// `debt × rate × days / 365`, rounded to cents (midpoint away from zero).
///
/// Fails with `Validation` instead of overflowing.
pub fn compute_penalty(debt: Decimal, daily_rate: Decimal, days_overdue: i64) -> LedgerResult<Decimal> {
    if debt <= Decimal::ZERO || days_overdue <= 0 {
        return Ok(Decimal::ZERO);
    }
    debt.checked_mul(daily_rate)
        .and_then(|v| v.checked_mul(Decimal::from(days_overdue)))
        .and_then(|v| v.checked_div(Decimal::from(DAYS_PER_YEAR)))
        .map(|v| v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| {
            LedgerError::validation(format!(
                "penalty on debt {} at rate {} over {} days is out of range",
                debt, daily_rate, days_overdue
            ))
        })
}

pub fn days_overdue(as_of: NaiveDate, due_date: NaiveDate) -> i64 {
    (as_of - due_date).num_days().max(0)
}

fn validate_run(run: &PenaltyRun) -> LedgerResult<()> {
    if run.daily_rate < Decimal::ZERO || run.daily_rate > MAX_PENALTY_RATE {
        return Err(LedgerError::validation(format!(
            "penalty rate must lie between 0 and {}",
            MAX_PENALTY_RATE
        )));
    }
    Ok(())
}

/// One row per (plot, accrual period) with outstanding charge debt.
pub fn preview_rows(state: &LedgerState, run: &PenaltyRun) -> LedgerResult<Vec<PenaltyPreviewRow>> {
    let mut debts: BTreeMap<(Uuid, BillingMonth, ChargeCategory, Uuid), Decimal> = BTreeMap::new();
    for charge in state.charges() {
        *debts
            .entry((charge.plot_id, charge.month, charge.category, charge.period_id))
            .or_default() += charge.outstanding();
    }

    let mut rows = Vec::new();
    for ((plot_id, month, category, period_id), base_debt) in debts {
        if base_debt <= Decimal::ZERO {
            continue;
        }
        let period = state.period(period_id)?;
        let days = days_overdue(run.as_of, period.due_date);
        rows.push(PenaltyPreviewRow {
            plot_id,
            period_id,
            month,
            category,
            due_date: period.due_date,
            base_debt,
            days_overdue: days,
            daily_rate: run.daily_rate,
            amount: compute_penalty(base_debt, run.daily_rate, days)?,
        });
    }
    Ok(rows)
}

/// Per-plot debt: open charges plus active and frozen penalties.
pub fn plot_debts(state: &LedgerState) -> Vec<PlotDebt> {
    let mut debts: BTreeMap<Uuid, PlotDebt> = BTreeMap::new();
    let entry = |debts: &mut BTreeMap<Uuid, PlotDebt>, plot_id: Uuid| {
        let number = state
            .plot(plot_id)
            .map(|p| p.number.clone())
            .unwrap_or_default();
        debts.entry(plot_id).or_insert_with(|| PlotDebt {
            plot_id,
            number,
            charge_debt: Decimal::ZERO,
            penalty_debt: Decimal::ZERO,
            total_debt: Decimal::ZERO,
            oldest_open_month: None,
        });
    };

    for charge in state.charges().filter(|c| c.is_open()) {
        entry(&mut debts, charge.plot_id);
        if let Some(debt) = debts.get_mut(&charge.plot_id) {
            debt.charge_debt += charge.outstanding();
            debt.oldest_open_month = Some(
                debt.oldest_open_month
                    .map_or(charge.month, |m| m.min(charge.month)),
            );
        }
    }
    for penalty in state.penalties().filter(|p| p.counts_towards_debt()) {
        entry(&mut debts, penalty.plot_id);
        if let Some(debt) = debts.get_mut(&penalty.plot_id) {
            debt.penalty_debt += penalty.amount;
        }
    }

    debts
        .into_values()
        .map(|mut debt| {
            debt.total_debt = debt.charge_debt + debt.penalty_debt;
            debt
        })
        .filter(|debt| debt.total_debt > Decimal::ZERO)
        .collect()
}

pub struct PenaltyEngine<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    default_policy_version: String,
}

impl<S: LedgerStore> PenaltyEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, default_policy_version: String) -> Self {
        Self {
            store,
            clock,
            default_policy_version,
        }
    }

    fn policy_version(&self, run: &PenaltyRun) -> String {
        run.policy_version
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.default_policy_version.clone())
    }

    pub fn preview(&self, run: &PenaltyRun) -> LedgerResult<Vec<PenaltyPreviewRow>> {
        validate_run(run)?;
        preview_rows(&self.store.snapshot(), run)
    }

    pub fn plot_debts(&self) -> Vec<PlotDebt> {
        plot_debts(&self.store.snapshot())
    }

    /// Persist positive preview rows as new active accruals. Pairs that
    /// already carry an active or frozen accrual are skipped.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn apply(&self, run: &PenaltyRun, ctx: &MutationContext) -> LedgerResult<PenaltySummary> {
        validate_run(run)?;
        let now = self.clock.now();
        let policy_version = self.policy_version(run);

        let summary = self.store.transact("apply_penalty", ctx, |state| {
            let mut summary = PenaltySummary::default();
            let mut to_create = Vec::new();
            for row in preview_rows(state, run)? {
                if row.amount <= Decimal::ZERO {
                    continue;
                }
                if state.live_penalty_for(row.plot_id, row.period_id).is_some() {
                    summary.skipped_existing += 1;
                    continue;
                }
                to_create.push(row);
            }
            ensure_mutable(state, to_create.iter().map(|r| r.month), ctx)?;

            for row in to_create {
                let accrual = PenaltyAccrual {
                    penalty_id: Uuid::new_v4(),
                    plot_id: row.plot_id,
                    period_id: row.period_id,
                    month: row.month,
                    amount: row.amount,
                    status: PenaltyStatus::Active,
                    computation: PenaltyComputation {
                        as_of: run.as_of,
                        daily_rate: run.daily_rate,
                        base_debt: row.base_debt,
                        days_overdue: row.days_overdue,
                        policy_version: policy_version.clone(),
                    },
                    status_reason: None,
                    status_actor: None,
                    status_changed_utc: None,
                    created_utc: now,
                    updated_utc: now,
                };
                note_change(state, accrual.month, EntityType::PenaltyAccrual, accrual.penalty_id, "apply_penalty", ctx, now);
                state.audit(
                    EntityType::PenaltyAccrual,
                    accrual.penalty_id,
                    "apply_penalty",
                    ctx,
                    json!({ "amount": accrual.amount, "computation": accrual.computation }),
                    now,
                );
                summary.created += 1;
                summary.penalty_ids.push(accrual.penalty_id);
                state.insert_penalty(accrual);
            }
            Ok(summary)
        })?;

        info!(
            created = summary.created,
            skipped_existing = summary.skipped_existing,
            "Penalty apply committed"
        );
        Ok(summary)
    }

    /// Recompute existing active accruals. Frozen and voided accruals are
    /// counted but left alone; zero-debt accruals keep their last value.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn recalc(&self, run: &PenaltyRun, ctx: &MutationContext) -> LedgerResult<PenaltySummary> {
        validate_run(run)?;
        let now = self.clock.now();
        let policy_version = self.policy_version(run);

        let summary = self.store.transact("recalc_penalty", ctx, |state| {
            let mut summary = PenaltySummary::default();
            let mut updates = Vec::new();
            for penalty in state.penalties() {
                match penalty.status {
                    PenaltyStatus::Voided => summary.skipped_voided += 1,
                    PenaltyStatus::Frozen => summary.skipped_frozen += 1,
                    PenaltyStatus::Active => {
                        let base_debt = state.charge_debt(penalty.plot_id, penalty.period_id);
                        if base_debt <= Decimal::ZERO {
                            summary.skipped_zero_debt += 1;
                            continue;
                        }
                        let period = state.period(penalty.period_id)?;
                        let days = days_overdue(run.as_of, period.due_date);
                        let computation = PenaltyComputation {
                            as_of: run.as_of,
                            daily_rate: run.daily_rate,
                            base_debt,
                            days_overdue: days,
                            policy_version: policy_version.clone(),
                        };
                        let amount = compute_penalty(base_debt, run.daily_rate, days)?;
                        if amount == penalty.amount && computation == penalty.computation {
                            summary.unchanged += 1;
                        } else {
                            updates.push((penalty.penalty_id, penalty.month, amount, computation));
                        }
                    }
                }
            }
            ensure_mutable(state, updates.iter().map(|u| u.1), ctx)?;

            for (penalty_id, month, amount, computation) in updates {
                let accrual = state.penalty_mut(penalty_id)?;
                let previous = accrual.amount;
                accrual.amount = amount;
                accrual.computation = computation;
                accrual.updated_utc = now;
                note_change(state, month, EntityType::PenaltyAccrual, penalty_id, "recalc_penalty", ctx, now);
                state.audit(
                    EntityType::PenaltyAccrual,
                    penalty_id,
                    "recalc_penalty",
                    ctx,
                    json!({ "previous_amount": previous, "amount": amount }),
                    now,
                );
                summary.updated += 1;
                summary.penalty_ids.push(penalty_id);
            }
            Ok(summary)
        })?;

        info!(
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped_frozen = summary.skipped_frozen,
            skipped_voided = summary.skipped_voided,
            skipped_zero_debt = summary.skipped_zero_debt,
            "Penalty recalc committed"
        );
        Ok(summary)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn void(&self, penalty_id: Uuid, ctx: &MutationContext) -> LedgerResult<PenaltyAccrual> {
        let reason = ctx.require_reason("void a penalty")?.to_string();
        self.transition(penalty_id, ctx, "void_penalty", |accrual, actor, at| {
            accrual.void(&reason, actor, at)
        })
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn freeze(&self, penalty_id: Uuid, ctx: &MutationContext) -> LedgerResult<PenaltyAccrual> {
        let reason = ctx.require_reason("freeze a penalty")?.to_string();
        self.transition(penalty_id, ctx, "freeze_penalty", |accrual, actor, at| {
            accrual.freeze(&reason, actor, at)
        })
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn unfreeze(&self, penalty_id: Uuid, ctx: &MutationContext) -> LedgerResult<PenaltyAccrual> {
        self.transition(penalty_id, ctx, "unfreeze_penalty", |accrual, actor, at| {
            accrual.unfreeze(actor, at)
        })
    }

    fn transition<F>(
        &self,
        penalty_id: Uuid,
        ctx: &MutationContext,
        action: &'static str,
        apply: F,
    ) -> LedgerResult<PenaltyAccrual>
    where
        F: FnOnce(&mut PenaltyAccrual, &str, chrono::DateTime<chrono::Utc>) -> LedgerResult<()>,
    {
        let now = self.clock.now();
        let accrual = self.store.transact(action, ctx, |state| {
            let month = state.penalty(penalty_id)?.month;
            ensure_mutable(state, [month], ctx)?;
            let accrual = state.penalty_mut(penalty_id)?;
            let from = accrual.status;
            apply(accrual, &ctx.actor, now)?;
            let accrual = accrual.clone();
            note_change(state, month, EntityType::PenaltyAccrual, penalty_id, action, ctx, now);
            state.audit(
                EntityType::PenaltyAccrual,
                penalty_id,
                action,
                ctx,
                json!({ "from": from.as_str(), "to": accrual.status.as_str() }),
                now,
            );
            Ok(accrual)
        })?;

        info!(%penalty_id, status = accrual.status.as_str(), "Penalty {}", action);
        Ok(accrual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_is_rounded_to_cents() {
        // 3000 × 0.1 × 31 / 365 = 25.4794...
        let amount = compute_penalty(Decimal::new(3000, 0), Decimal::new(1, 1), 31).unwrap();
        assert_eq!(amount, Decimal::new(2548, 2));
    }

    #[test]
    fn nothing_accrues_before_the_due_date() {
        let due = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let as_of = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();
        assert_eq!(days_overdue(as_of, due), 0);
        assert_eq!(compute_penalty(Decimal::new(3000, 0), Decimal::ONE, 0), Ok(Decimal::ZERO));
    }

    #[test]
    fn oversized_inputs_are_rejected_not_overflowed() {
        let err = compute_penalty(Decimal::MAX, Decimal::MAX, 400).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
