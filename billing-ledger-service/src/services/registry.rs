//! Plots, charges and payments: the records the engines work on.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    AllocationStatus, BillingMonth, Charge, EntityType, MatchStatus, NewCharge, NewPayment,
    Payment, PaymentMethod, Plot, UpsertPlot,
};
use crate::services::allocation::reverse_open_allocations;
use crate::services::clock::Clock;
use crate::services::guard::{ensure_mutable, note_change, MutationContext};
use crate::services::import::fingerprint;
use crate::services::matching::{MatchOutcome, PlotMatcher};
use crate::services::store::{LedgerState, LedgerStore};

/// Everything needed to store a payment except its identity and derived totals.
pub(crate) struct PaymentDraft {
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub payer: String,
    pub purpose: String,
    pub method: PaymentMethod,
    pub bank_reference: Option<String>,
    pub fingerprint: String,
    pub import_batch_id: Option<Uuid>,
    pub outcome: MatchOutcome,
}

pub(crate) fn record_payment(
    state: &mut LedgerState,
    draft: PaymentDraft,
    now: DateTime<Utc>,
) -> LedgerResult<Payment> {
    let seq = state.next_seq();
    let payment = Payment {
        payment_id: Uuid::new_v4(),
        amount: draft.amount,
        paid_on: draft.paid_on,
        payer: draft.payer,
        purpose: draft.purpose,
        method: draft.method,
        bank_reference: draft.bank_reference,
        fingerprint: draft.fingerprint,
        import_batch_id: draft.import_batch_id,
        match_status: draft.outcome.match_status,
        matched_plot_id: draft.outcome.matched_plot_id,
        match_candidates: draft.outcome.candidates,
        match_confidence: draft.outcome.confidence,
        match_reason: draft.outcome.reason,
        allocation_status: AllocationStatus::Unallocated,
        allocated_amount: Decimal::ZERO,
        remaining_amount: draft.amount,
        auto_allocate_disabled: false,
        is_voided: false,
        void_reason: None,
        voided_utc: None,
        seq,
        created_utc: now,
    };
    state.insert_payment(payment.clone())?;
    Ok(payment)
}

/// Void a payment inside an open transaction: reverse what it paid, then
/// flag it. Returns the number of reversal entries written.
pub(crate) fn void_payment_in(
    state: &mut LedgerState,
    payment_id: Uuid,
    ctx: &MutationContext,
    now: DateTime<Utc>,
) -> LedgerResult<usize> {
    let reason = ctx.require_reason("void a payment")?.to_string();
    let payment = state.payment(payment_id)?;
    if payment.is_voided {
        return Err(LedgerError::InvalidTransition {
            entity: "payment",
            action: "void",
            status: "voided",
        });
    }
    let month = BillingMonth::of(payment.paid_on);
    let charge_months: Vec<BillingMonth> = state
        .allocations_for_payment(payment_id)
        .filter(|a| !a.is_reversal() && !state.is_reversed(a.allocation_id))
        .filter_map(|a| state.charge(a.charge_id).ok().map(|c| c.month))
        .collect();
    ensure_mutable(state, charge_months.into_iter().chain([month]), ctx)?;

    let reversals = reverse_open_allocations(state, payment_id, ctx, now)?;

    let payment = state.payment_mut(payment_id)?;
    payment.is_voided = true;
    payment.void_reason = Some(reason);
    payment.voided_utc = Some(now);
    let amount = payment.amount;

    note_change(state, month, EntityType::Payment, payment_id, "void_payment", ctx, now);
    state.audit(
        EntityType::Payment,
        payment_id,
        "void_payment",
        ctx,
        json!({ "amount": amount, "reversed_allocations": reversals.len() }),
        now,
    );
    Ok(reversals.len())
}

pub struct Registry<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    matcher: PlotMatcher,
}

impl<S: LedgerStore> Registry<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, matcher: PlotMatcher) -> Self {
        Self {
            store,
            clock,
            matcher,
        }
    }

    // -------------------------------------------------------------------------
    // Plots
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input, ctx), fields(number = %input.number, actor = %ctx.actor))]
    pub fn upsert_plot(&self, input: UpsertPlot, ctx: &MutationContext) -> LedgerResult<Plot> {
        let number = input.number.trim().to_string();
        if number.is_empty() {
            return Err(LedgerError::validation("plot number must not be empty"));
        }
        let street = input
            .street
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let label = input
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match &street {
                Some(street) => format!("{} {}", street, number),
                None => number.clone(),
            });
        let now = self.clock.now();

        let plot = self.store.transact("upsert_plot", ctx, |state| {
            let clash = state.plots().find(|p| {
                !p.archived
                    && Some(p.plot_id) != input.plot_id
                    && p.number.eq_ignore_ascii_case(&number)
                    && p.street.as_deref().map(str::to_lowercase)
                        == street.as_deref().map(str::to_lowercase)
            });
            if let Some(existing) = clash {
                return Err(LedgerError::validation(format!(
                    "plot {} already exists as {}",
                    existing.label, existing.plot_id
                )));
            }

            let (plot, action) = match input.plot_id.and_then(|id| state.plot_mut(id).ok()) {
                Some(plot) => {
                    plot.number = number.clone();
                    plot.street = street.clone();
                    plot.label = label.clone();
                    plot.owner_name = input.owner_name.clone();
                    plot.contact = input.contact.clone();
                    plot.membership = input.membership;
                    plot.updated_utc = now;
                    (plot.clone(), "update_plot")
                }
                None => {
                    let plot = Plot {
                        plot_id: input.plot_id.unwrap_or_else(Uuid::new_v4),
                        number: number.clone(),
                        street: street.clone(),
                        label: label.clone(),
                        owner_name: input.owner_name.clone(),
                        contact: input.contact.clone(),
                        membership: input.membership,
                        archived: false,
                        created_utc: now,
                        updated_utc: now,
                    };
                    state.insert_plot(plot.clone());
                    (plot, "create_plot")
                }
            };
            state.audit(
                EntityType::Plot,
                plot.plot_id,
                action,
                ctx,
                json!({ "label": plot.label, "membership": plot.membership.as_str() }),
                now,
            );
            Ok(plot)
        })?;

        info!(plot_id = %plot.plot_id, label = %plot.label, "Plot saved");
        Ok(plot)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn archive_plot(&self, plot_id: Uuid, ctx: &MutationContext) -> LedgerResult<Plot> {
        let now = self.clock.now();
        self.store.transact("archive_plot", ctx, |state| {
            let plot = state.plot_mut(plot_id)?;
            if plot.archived {
                return Ok(plot.clone());
            }
            plot.archived = true;
            plot.updated_utc = now;
            let plot = plot.clone();
            state.audit(EntityType::Plot, plot_id, "archive_plot", ctx, json!({}), now);
            Ok(plot)
        })
    }

    pub fn list_plots(&self, include_archived: bool) -> Vec<Plot> {
        self.store
            .snapshot()
            .plots()
            .filter(|p| include_archived || !p.archived)
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Charges
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input, ctx), fields(plot_id = %input.plot_id, month = %input.month, actor = %ctx.actor))]
    pub fn create_charge(&self, input: NewCharge, ctx: &MutationContext) -> LedgerResult<Charge> {
        if input.amount <= Decimal::ZERO {
            return Err(LedgerError::validation("charge amount must be positive"));
        }
        let now = self.clock.now();

        let charge = self.store.transact("create_charge", ctx, |state| {
            if state.plot(input.plot_id)?.archived {
                return Err(LedgerError::validation(format!(
                    "plot {} is archived",
                    input.plot_id
                )));
            }
            ensure_mutable(state, [input.month], ctx)?;

            let period = state.ensure_period(input.month, input.category, input.due_date, now);
            let seq = state.next_seq();
            let charge = Charge {
                charge_id: Uuid::new_v4(),
                plot_id: input.plot_id,
                period_id: period.period_id,
                month: input.month,
                category: input.category,
                amount_accrued: input.amount,
                amount_paid: Decimal::ZERO,
                note: input.note.clone(),
                seq,
                created_utc: now,
            };
            state.insert_charge(charge.clone());
            note_change(
                state,
                charge.month,
                EntityType::Charge,
                charge.charge_id,
                "create_charge",
                ctx,
                now,
            );
            state.audit(
                EntityType::Charge,
                charge.charge_id,
                "create_charge",
                ctx,
                json!({
                    "plot_id": charge.plot_id,
                    "month": charge.month,
                    "category": charge.category.as_str(),
                    "amount": charge.amount_accrued,
                }),
                now,
            );
            Ok(charge)
        })?;

        info!(charge_id = %charge.charge_id, amount = %charge.amount_accrued, "Charge created");
        Ok(charge)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input, ctx), fields(amount = %input.amount, paid_on = %input.paid_on, actor = %ctx.actor))]
    pub fn create_payment(&self, input: NewPayment, ctx: &MutationContext) -> LedgerResult<Payment> {
        if input.amount <= Decimal::ZERO {
            return Err(LedgerError::validation("payment amount must be positive"));
        }
        let fingerprint = fingerprint(
            input.paid_on,
            input.amount,
            &input.payer,
            &input.purpose,
            input.bank_reference.as_deref(),
        );
        let now = self.clock.now();
        let month = BillingMonth::of(input.paid_on);

        let payment = self.store.transact("create_payment", ctx, |state| {
            if state.has_fingerprint(&fingerprint) {
                return Err(LedgerError::validation(format!(
                    "payment {} is already recorded",
                    fingerprint
                )));
            }
            ensure_mutable(state, [month], ctx)?;

            let outcome = match input.plot_id {
                Some(plot_id) => {
                    let plot = state.plot(plot_id)?;
                    MatchOutcome {
                        match_status: MatchStatus::Matched,
                        matched_plot_id: Some(plot_id),
                        candidates: vec![plot_id],
                        confidence: 1.0,
                        reason: format!("plot {} assigned by {}", plot.label, ctx.actor),
                    }
                }
                None => self.matcher.match_payment(
                    state.plots(),
                    &input.payer,
                    &input.purpose,
                    input.amount,
                ),
            };
            let payment = record_payment(
                state,
                PaymentDraft {
                    amount: input.amount,
                    paid_on: input.paid_on,
                    payer: input.payer.clone(),
                    purpose: input.purpose.clone(),
                    method: input.method,
                    bank_reference: input.bank_reference.clone(),
                    fingerprint: fingerprint.clone(),
                    import_batch_id: None,
                    outcome,
                },
                now,
            )?;
            note_change(state, month, EntityType::Payment, payment.payment_id, "create_payment", ctx, now);
            state.audit(
                EntityType::Payment,
                payment.payment_id,
                "create_payment",
                ctx,
                json!({
                    "amount": payment.amount,
                    "match_status": payment.match_status.as_str(),
                    "matched_plot_id": payment.matched_plot_id,
                }),
                now,
            );
            Ok(payment)
        })?;

        info!(
            payment_id = %payment.payment_id,
            match_status = %payment.match_status,
            "Payment recorded"
        );
        Ok(payment)
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn void_payment(&self, payment_id: Uuid, ctx: &MutationContext) -> LedgerResult<Payment> {
        let now = self.clock.now();
        let (payment, reversed) = self.store.transact("void_payment", ctx, |state| {
            let reversed = void_payment_in(state, payment_id, ctx, now)?;
            Ok((state.payment(payment_id)?.clone(), reversed))
        })?;
        info!(%payment_id, reversed, "Payment voided");
        Ok(payment)
    }

    /// Resolve an unmatched or ambiguous payment by hand.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn assign_plot(
        &self,
        payment_id: Uuid,
        plot_id: Uuid,
        ctx: &MutationContext,
    ) -> LedgerResult<Payment> {
        let now = self.clock.now();
        self.store.transact("assign_plot", ctx, |state| {
            let label = state.plot(plot_id)?.label.clone();
            if state.plot(plot_id)?.archived {
                return Err(LedgerError::validation(format!("plot {} is archived", label)));
            }
            let payment = state.payment_mut(payment_id)?;
            if payment.is_voided {
                return Err(LedgerError::InvalidTransition {
                    entity: "payment",
                    action: "assign",
                    status: "voided",
                });
            }
            if payment.allocated_amount != Decimal::ZERO {
                return Err(LedgerError::validation(
                    "unapply the payment's allocations before reassigning it",
                ));
            }
            let previous = payment.matched_plot_id;
            payment.match_status = MatchStatus::Matched;
            payment.matched_plot_id = Some(plot_id);
            payment.match_confidence = 1.0;
            payment.match_reason = format!("plot {} assigned by {}", label, ctx.actor);
            if !payment.match_candidates.contains(&plot_id) {
                payment.match_candidates.push(plot_id);
            }
            let payment = payment.clone();
            state.audit(
                EntityType::Payment,
                payment_id,
                "assign_plot",
                ctx,
                json!({ "plot_id": plot_id, "previous_plot_id": previous }),
                now,
            );
            Ok(payment)
        })
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn set_auto_allocate_disabled(
        &self,
        payment_id: Uuid,
        disabled: bool,
        ctx: &MutationContext,
    ) -> LedgerResult<Payment> {
        let now = self.clock.now();
        self.store.transact("set_auto_allocate", ctx, |state| {
            let payment = state.payment_mut(payment_id)?;
            payment.auto_allocate_disabled = disabled;
            let payment = payment.clone();
            state.audit(
                EntityType::Payment,
                payment_id,
                "set_auto_allocate_disabled",
                ctx,
                json!({ "disabled": disabled }),
                now,
            );
            Ok(payment)
        })
    }

    pub fn payment(&self, payment_id: Uuid) -> LedgerResult<Payment> {
        self.store.snapshot().payment(payment_id).cloned()
    }
}
