//! Allocation engine: applies payments to charges and reverses them.
//!
//! The allocation log is append-only. Unapplying writes a negative entry that
//! points back at the original, and payment/charge totals are always
//! recomputed from the log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Allocation, AllocationKind, AllocationLine, AllocationPreview, AllocationSummary,
    AutoAllocateRequest, BillingMonth, Charge, EntityType, Payment, UnapplyTarget,
};
use crate::services::clock::Clock;
use crate::services::guard::{ensure_mutable, note_change, MutationContext};
use crate::services::store::{LedgerState, LedgerStore};

/// The greedy auto-allocation plan for the current state.
///
/// Payments are taken in (payment date, creation order); each one fills its
/// own plot's open charges oldest month first, then by charge creation order.
pub fn plan_auto_allocation(state: &LedgerState, request: &AutoAllocateRequest) -> Vec<AllocationLine> {
    let wanted: Option<BTreeSet<Uuid>> = request
        .payment_ids
        .as_ref()
        .map(|ids| ids.iter().copied().collect());

    let mut payments: Vec<&Payment> = state
        .payments()
        .filter(|p| p.is_auto_allocatable())
        .filter(|p| wanted.as_ref().map_or(true, |ids| ids.contains(&p.payment_id)))
        .filter(|p| request.plot_id.map_or(true, |plot| p.matched_plot_id == Some(plot)))
        .collect();
    payments.sort_by_key(|p| (p.paid_on, p.seq));

    let mut charges_by_plot: HashMap<Uuid, Vec<&Charge>> = HashMap::new();
    for charge in state.charges() {
        if request.through.map_or(true, |through| charge.month <= through) {
            charges_by_plot.entry(charge.plot_id).or_default().push(charge);
        }
    }
    for charges in charges_by_plot.values_mut() {
        charges.sort_by_key(|c| (c.month, c.seq));
    }

    let mut outstanding: HashMap<Uuid, Decimal> = HashMap::new();
    let mut lines = Vec::new();
    for payment in payments {
        let Some(plot_id) = payment.matched_plot_id else {
            continue;
        };
        let Some(charges) = charges_by_plot.get(&plot_id) else {
            continue;
        };
        let mut remaining = payment.remaining_amount;
        for charge in charges {
            if remaining <= Decimal::ZERO {
                break;
            }
            let open = outstanding
                .entry(charge.charge_id)
                .or_insert_with(|| charge.outstanding());
            if *open <= Decimal::ZERO {
                continue;
            }
            let amount = remaining.min(*open);
            *open -= amount;
            remaining -= amount;
            lines.push(AllocationLine {
                payment_id: payment.payment_id,
                charge_id: charge.charge_id,
                plot_id,
                month: charge.month,
                amount,
            });
        }
    }
    lines
}

/// Write one allocation entry and log it.
fn write_allocation(
    state: &mut LedgerState,
    line: &AllocationLine,
    kind: AllocationKind,
    reverses: Option<Uuid>,
    ctx: &MutationContext,
    now: DateTime<Utc>,
) -> LedgerResult<Allocation> {
    let seq = state.next_seq();
    let allocation = Allocation {
        allocation_id: Uuid::new_v4(),
        payment_id: line.payment_id,
        charge_id: line.charge_id,
        amount: line.amount,
        kind,
        reverses_allocation_id: reverses,
        reason: ctx.reason().map(str::to_string),
        actor: ctx.actor.clone(),
        seq,
        created_utc: now,
    };
    state.push_allocation(allocation.clone())?;
    note_change(
        state,
        line.month,
        EntityType::Allocation,
        allocation.allocation_id,
        kind.as_str(),
        ctx,
        now,
    );
    state.audit(
        EntityType::Allocation,
        allocation.allocation_id,
        kind.as_str(),
        ctx,
        json!({
            "payment_id": line.payment_id,
            "charge_id": line.charge_id,
            "amount": line.amount,
            "reverses_allocation_id": reverses,
        }),
        now,
    );
    Ok(allocation)
}

fn reversal_line(state: &LedgerState, original: &Allocation) -> LedgerResult<AllocationLine> {
    let charge = state.charge(original.charge_id)?;
    Ok(AllocationLine {
        payment_id: original.payment_id,
        charge_id: original.charge_id,
        plot_id: charge.plot_id,
        month: charge.month,
        amount: -original.amount,
    })
}

/// Original entries of a payment that have not been reversed yet.
pub(crate) fn open_allocations(state: &LedgerState, payment_id: Uuid) -> Vec<Allocation> {
    state
        .allocations_for_payment(payment_id)
        .filter(|a| !a.is_reversal() && !state.is_reversed(a.allocation_id))
        .cloned()
        .collect()
}

/// Reverse every open allocation of a payment. The caller has already run the
/// closed-period check for the affected months.
pub(crate) fn reverse_open_allocations(
    state: &mut LedgerState,
    payment_id: Uuid,
    ctx: &MutationContext,
    now: DateTime<Utc>,
) -> LedgerResult<Vec<Allocation>> {
    let mut reversals = Vec::new();
    for original in open_allocations(state, payment_id) {
        let line = reversal_line(state, &original)?;
        reversals.push(write_allocation(
            state,
            &line,
            AllocationKind::Reversal,
            Some(original.allocation_id),
            ctx,
            now,
        )?);
    }
    Ok(reversals)
}

fn summarize(allocations: &[Allocation], closed: BTreeSet<BillingMonth>) -> AllocationSummary {
    let payments: BTreeSet<Uuid> = allocations.iter().map(|a| a.payment_id).collect();
    let charges: BTreeSet<Uuid> = allocations.iter().map(|a| a.charge_id).collect();
    AllocationSummary {
        updated_count: payments.len(),
        charges_affected: charges.len(),
        total_allocated: allocations.iter().map(|a| a.amount).sum(),
        allocation_ids: allocations.iter().map(|a| a.allocation_id).collect(),
        post_close_months: closed.into_iter().collect(),
    }
}

pub struct AllocationEngine<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> AllocationEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Advisory only: the plan is recomputed when the allocation runs.
    pub fn preview(&self, request: &AutoAllocateRequest) -> AllocationPreview {
        let lines = plan_auto_allocation(&self.store.snapshot(), request);
        let payments: BTreeSet<Uuid> = lines.iter().map(|l| l.payment_id).collect();
        AllocationPreview {
            updated_count: payments.len(),
            total_allocated: lines.iter().map(|l| l.amount).sum(),
            lines,
        }
    }

    #[instrument(skip(self, request, ctx), fields(actor = %ctx.actor))]
    pub fn auto_allocate(
        &self,
        request: &AutoAllocateRequest,
        ctx: &MutationContext,
    ) -> LedgerResult<AllocationSummary> {
        let now = self.clock.now();
        let summary = self.store.transact("auto_allocate", ctx, |state| {
            let lines = plan_auto_allocation(state, request);
            let closed = ensure_mutable(state, lines.iter().map(|l| l.month), ctx)?;
            let mut written = Vec::with_capacity(lines.len());
            for line in &lines {
                written.push(write_allocation(state, line, AllocationKind::Auto, None, ctx, now)?);
            }
            Ok(summarize(&written, closed))
        })?;

        info!(
            payments = summary.updated_count,
            charges = summary.charges_affected,
            total = %summary.total_allocated,
            "Auto-allocation committed"
        );
        Ok(summary)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn manual_allocate(
        &self,
        payment_id: Uuid,
        charge_id: Uuid,
        amount: Decimal,
        ctx: &MutationContext,
    ) -> LedgerResult<AllocationSummary> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("allocation amount must be positive"));
        }
        let now = self.clock.now();
        let summary = self.store.transact("manual_allocate", ctx, |state| {
            let payment = state.payment(payment_id)?;
            if payment.is_voided {
                return Err(LedgerError::InvalidTransition {
                    entity: "payment",
                    action: "allocate",
                    status: "voided",
                });
            }
            if amount > payment.remaining_amount {
                return Err(LedgerError::InsufficientRemaining {
                    payment_id,
                    requested: amount,
                    remaining: payment.remaining_amount,
                });
            }
            let charge = state.charge(charge_id)?;
            let line = AllocationLine {
                payment_id,
                charge_id,
                plot_id: charge.plot_id,
                month: charge.month,
                amount,
            };
            let closed = ensure_mutable(state, [line.month], ctx)?;
            let written = write_allocation(state, &line, AllocationKind::Manual, None, ctx, now)?;
            Ok(summarize(&[written], closed))
        })?;

        info!(%payment_id, %charge_id, %amount, "Manual allocation committed");
        Ok(summary)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn unapply(
        &self,
        target: UnapplyTarget,
        ctx: &MutationContext,
    ) -> LedgerResult<AllocationSummary> {
        let now = self.clock.now();
        let summary = self.store.transact("unapply", ctx, |state| {
            let originals = match target {
                UnapplyTarget::Allocation(allocation_id) => {
                    let allocation = state.allocation(allocation_id)?;
                    if allocation.is_reversal() {
                        return Err(LedgerError::validation(format!(
                            "allocation {} is itself a reversal",
                            allocation_id
                        )));
                    }
                    if state.is_reversed(allocation_id) {
                        return Err(LedgerError::validation(format!(
                            "allocation {} is already reversed",
                            allocation_id
                        )));
                    }
                    vec![allocation.clone()]
                }
                UnapplyTarget::Payment(payment_id) => {
                    state.payment(payment_id)?;
                    open_allocations(state, payment_id)
                }
            };
            let lines = originals
                .iter()
                .map(|original| reversal_line(state, original))
                .collect::<LedgerResult<Vec<_>>>()?;
            let closed = ensure_mutable(state, lines.iter().map(|l| l.month), ctx)?;

            let mut written = Vec::with_capacity(lines.len());
            for (original, line) in originals.iter().zip(&lines) {
                written.push(write_allocation(
                    state,
                    line,
                    AllocationKind::Reversal,
                    Some(original.allocation_id),
                    ctx,
                    now,
                )?);
            }
            Ok(summarize(&written, closed))
        })?;

        info!(
            reversed = summary.allocation_ids.len(),
            total = %summary.total_allocated,
            "Unapply committed"
        );
        Ok(summary)
    }
}
