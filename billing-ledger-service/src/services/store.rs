//! Ledger state and the transactional store that guards it.
//!
//! Every mutation runs through [`LedgerStore::transact`]. The in-memory store
//! applies the closure to a private copy of the state and publishes the copy
//! only when the closure returns `Ok`, so a failed operation leaves no trace.
//! Writers are serialized; readers work on immutable snapshots and never block
//! a writer for longer than a pointer swap.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    AccrualPeriod, Allocation, AuditEntry, BillingMonth, Charge, ChargeCategory, EntityType,
    ImportBatch, Payment, PenaltyAccrual, PeriodCloseRecord, Plot, PostCloseChange,
};
use crate::services::guard::MutationContext;
use crate::services::metrics::{record_error, record_operation, TRANSACTION_DURATION};

/// Everything the ledger knows, in one consistent value.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    plots: BTreeMap<Uuid, Plot>,
    periods: BTreeMap<Uuid, AccrualPeriod>,
    period_index: HashMap<(BillingMonth, ChargeCategory), Uuid>,
    charges: BTreeMap<Uuid, Charge>,
    payments: BTreeMap<Uuid, Payment>,
    allocations: Vec<Allocation>,
    payment_allocations: HashMap<Uuid, Vec<usize>>,
    charge_allocations: HashMap<Uuid, Vec<usize>>,
    allocation_index: HashMap<Uuid, usize>,
    reversed: HashSet<Uuid>,
    penalties: BTreeMap<Uuid, PenaltyAccrual>,
    closes: BTreeMap<BillingMonth, PeriodCloseRecord>,
    post_close_changes: Vec<PostCloseChange>,
    import_batches: BTreeMap<Uuid, ImportBatch>,
    fingerprints: HashMap<String, Uuid>,
    audit_log: Vec<AuditEntry>,
    seq: u64,
}

impl LedgerState {
    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn plot(&self, plot_id: Uuid) -> LedgerResult<&Plot> {
        self.plots
            .get(&plot_id)
            .ok_or_else(|| LedgerError::not_found("plot", plot_id))
    }

    pub fn plots(&self) -> impl Iterator<Item = &Plot> {
        self.plots.values()
    }

    pub fn charge(&self, charge_id: Uuid) -> LedgerResult<&Charge> {
        self.charges
            .get(&charge_id)
            .ok_or_else(|| LedgerError::not_found("charge", charge_id))
    }

    pub fn charges(&self) -> impl Iterator<Item = &Charge> {
        self.charges.values()
    }

    pub fn payment(&self, payment_id: Uuid) -> LedgerResult<&Payment> {
        self.payments
            .get(&payment_id)
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))
    }

    pub fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }

    /// The allocation log in append order.
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn allocation(&self, allocation_id: Uuid) -> LedgerResult<&Allocation> {
        self.allocation_index
            .get(&allocation_id)
            .map(|&idx| &self.allocations[idx])
            .ok_or_else(|| LedgerError::not_found("allocation", allocation_id))
    }

    pub fn allocations_for_payment(&self, payment_id: Uuid) -> impl Iterator<Item = &Allocation> {
        self.payment_allocations
            .get(&payment_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.allocations[idx])
    }

    pub fn allocations_for_charge(&self, charge_id: Uuid) -> impl Iterator<Item = &Allocation> {
        self.charge_allocations
            .get(&charge_id)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.allocations[idx])
    }

    /// Whether a reversal entry already points at this allocation.
    pub fn is_reversed(&self, allocation_id: Uuid) -> bool {
        self.reversed.contains(&allocation_id)
    }

    pub fn penalty(&self, penalty_id: Uuid) -> LedgerResult<&PenaltyAccrual> {
        self.penalties
            .get(&penalty_id)
            .ok_or_else(|| LedgerError::not_found("penalty accrual", penalty_id))
    }

    pub fn penalties(&self) -> impl Iterator<Item = &PenaltyAccrual> {
        self.penalties.values()
    }

    pub fn period(&self, period_id: Uuid) -> LedgerResult<&AccrualPeriod> {
        self.periods
            .get(&period_id)
            .ok_or_else(|| LedgerError::not_found("accrual period", period_id))
    }

    pub fn period_for(&self, month: BillingMonth, category: ChargeCategory) -> Option<&AccrualPeriod> {
        self.period_index
            .get(&(month, category))
            .and_then(|id| self.periods.get(id))
    }

    pub fn close_record(&self, month: BillingMonth) -> Option<&PeriodCloseRecord> {
        self.closes.get(&month)
    }

    pub fn is_closed(&self, month: BillingMonth) -> bool {
        self.closes.contains_key(&month)
    }

    pub fn post_close_changes(&self) -> &[PostCloseChange] {
        &self.post_close_changes
    }

    pub fn import_batch(&self, batch_id: Uuid) -> LedgerResult<&ImportBatch> {
        self.import_batches
            .get(&batch_id)
            .ok_or_else(|| LedgerError::not_found("import batch", batch_id))
    }

    /// Fingerprints of every payment ever stored, voided ones included.
    pub fn has_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains_key(fingerprint)
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }

    /// Outstanding charge debt of one plot in one accrual period.
    pub fn charge_debt(&self, plot_id: Uuid, period_id: Uuid) -> Decimal {
        self.charges
            .values()
            .filter(|c| c.plot_id == plot_id && c.period_id == period_id)
            .map(Charge::outstanding)
            .sum()
    }

    /// The active or frozen accrual for a (plot, period) pair, if any.
    pub fn live_penalty_for(&self, plot_id: Uuid, period_id: Uuid) -> Option<&PenaltyAccrual> {
        self.penalties
            .values()
            .find(|p| p.plot_id == plot_id && p.period_id == period_id && p.counts_towards_debt())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub(crate) fn plot_mut(&mut self, plot_id: Uuid) -> LedgerResult<&mut Plot> {
        self.plots
            .get_mut(&plot_id)
            .ok_or_else(|| LedgerError::not_found("plot", plot_id))
    }

    pub(crate) fn payment_mut(&mut self, payment_id: Uuid) -> LedgerResult<&mut Payment> {
        self.payments
            .get_mut(&payment_id)
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))
    }

    pub(crate) fn penalty_mut(&mut self, penalty_id: Uuid) -> LedgerResult<&mut PenaltyAccrual> {
        self.penalties
            .get_mut(&penalty_id)
            .ok_or_else(|| LedgerError::not_found("penalty accrual", penalty_id))
    }

    pub(crate) fn batch_mut(&mut self, batch_id: Uuid) -> LedgerResult<&mut ImportBatch> {
        self.import_batches
            .get_mut(&batch_id)
            .ok_or_else(|| LedgerError::not_found("import batch", batch_id))
    }

    pub(crate) fn insert_plot(&mut self, plot: Plot) {
        self.plots.insert(plot.plot_id, plot);
    }

    pub(crate) fn insert_charge(&mut self, charge: Charge) {
        self.charges.insert(charge.charge_id, charge);
    }

    pub(crate) fn insert_payment(&mut self, payment: Payment) -> LedgerResult<()> {
        if self.fingerprints.contains_key(&payment.fingerprint) {
            return Err(LedgerError::validation(format!(
                "a payment with fingerprint {} already exists",
                payment.fingerprint
            )));
        }
        self.fingerprints
            .insert(payment.fingerprint.clone(), payment.payment_id);
        self.payments.insert(payment.payment_id, payment);
        Ok(())
    }

    pub(crate) fn insert_penalty(&mut self, penalty: PenaltyAccrual) {
        self.penalties.insert(penalty.penalty_id, penalty);
    }

    pub(crate) fn insert_batch(&mut self, batch: ImportBatch) {
        self.import_batches.insert(batch.batch_id, batch);
    }

    pub(crate) fn insert_close_record(&mut self, record: PeriodCloseRecord) {
        self.closes.insert(record.month, record);
    }

    /// The accrual period for `(month, category)`, created on first use.
    pub(crate) fn ensure_period(
        &mut self,
        month: BillingMonth,
        category: ChargeCategory,
        due_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> AccrualPeriod {
        if let Some(existing) = self.period_for(month, category) {
            return existing.clone();
        }
        let period = AccrualPeriod {
            period_id: Uuid::new_v4(),
            month,
            category,
            due_date: due_date.unwrap_or_else(|| month.default_due_date()),
            created_utc: now,
        };
        self.period_index.insert((month, category), period.period_id);
        self.periods.insert(period.period_id, period.clone());
        period
    }

    /// Append to the allocation log and refresh the derived totals of the
    /// payment and charge it touches.
    pub(crate) fn push_allocation(&mut self, allocation: Allocation) -> LedgerResult<()> {
        let idx = self.allocations.len();
        let payment_id = allocation.payment_id;
        let charge_id = allocation.charge_id;
        if let Some(original) = allocation.reverses_allocation_id {
            if !self.reversed.insert(original) {
                return Err(LedgerError::validation(format!(
                    "allocation {} is already reversed",
                    original
                )));
            }
        }
        self.allocation_index.insert(allocation.allocation_id, idx);
        self.payment_allocations.entry(payment_id).or_default().push(idx);
        self.charge_allocations.entry(charge_id).or_default().push(idx);
        self.allocations.push(allocation);

        self.refresh_payment(payment_id)?;
        self.refresh_charge(charge_id)
    }

    fn refresh_payment(&mut self, payment_id: Uuid) -> LedgerResult<()> {
        let allocated: Decimal = self.allocations_for_payment(payment_id).map(|a| a.amount).sum();
        let payment = self.payment_mut(payment_id)?;
        if allocated < Decimal::ZERO || allocated > payment.amount {
            return Err(LedgerError::validation(format!(
                "allocations of {} would exceed payment {} of {}",
                allocated, payment_id, payment.amount
            )));
        }
        payment.apply_allocated(allocated);
        Ok(())
    }

    fn refresh_charge(&mut self, charge_id: Uuid) -> LedgerResult<()> {
        let paid: Decimal = self.allocations_for_charge(charge_id).map(|a| a.amount).sum();
        if paid < Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "allocations to charge {} would turn negative",
                charge_id
            )));
        }
        let charge = self
            .charges
            .get_mut(&charge_id)
            .ok_or_else(|| LedgerError::not_found("charge", charge_id))?;
        charge.amount_paid = paid;
        Ok(())
    }

    pub(crate) fn push_post_close_change(
        &mut self,
        month: BillingMonth,
        entity_type: EntityType,
        entity_id: Uuid,
        action: &str,
        ctx: &MutationContext,
        at: DateTime<Utc>,
    ) {
        let seq = self.next_seq();
        self.post_close_changes.push(PostCloseChange {
            seq,
            month,
            entity_type,
            entity_id,
            action: action.to_string(),
            reason: ctx.reason().unwrap_or_default().to_string(),
            actor: ctx.actor.clone(),
            at,
        });
    }

    pub(crate) fn audit(
        &mut self,
        entity_type: EntityType,
        entity_id: impl ToString,
        action: &str,
        ctx: &MutationContext,
        details: Value,
        at: DateTime<Utc>,
    ) {
        let seq = self.next_seq();
        self.audit_log.push(AuditEntry {
            seq,
            entity_type,
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            actor: ctx.actor.clone(),
            reason: ctx.reason().map(str::to_string),
            details,
            at,
        });
    }
}

/// Transactional access to the ledger state.
pub trait LedgerStore: Send + Sync + 'static {
    /// A consistent read-only view as of the last committed transaction.
    fn snapshot(&self) -> Arc<LedgerState>;

    /// Run `apply` against the state. Changes become visible only if it
    /// returns `Ok` and `ctx` may still commit; concurrent writers are
    /// serialized.
    fn transact<T, F>(&self, operation: &'static str, ctx: &MutationContext, apply: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut LedgerState) -> LedgerResult<T>;
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    current: RwLock<Arc<LedgerState>>,
    writer: Mutex<()>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn snapshot(&self) -> Arc<LedgerState> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn transact<T, F>(&self, operation: &'static str, ctx: &MutationContext, apply: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut LedgerState) -> LedgerResult<T>,
    {
        let timer = TRANSACTION_DURATION
            .with_label_values(&[operation])
            .start_timer();
        // A panic inside `apply` poisons the lock but never the published
        // state, which is only replaced on success.
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut working = LedgerState::clone(&self.snapshot());
        let outcome = ctx
            .ensure_live()
            .and_then(|()| apply(&mut working))
            .and_then(|value| ctx.claim_commit().map(|()| value));
        match &outcome {
            Ok(_) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(working);
                record_operation(operation, true);
            }
            Err(err) => {
                debug!(operation, error = %err, "Ledger transaction rolled back");
                record_operation(operation, false);
                record_error(err.kind());
            }
        }
        timer.observe_duration();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MembershipStatus;
    use crate::services::guard::AttemptGate;

    fn plot(number: &str) -> Plot {
        let now = Utc::now();
        Plot {
            plot_id: Uuid::new_v4(),
            number: number.to_string(),
            street: None,
            label: number.to_string(),
            owner_name: None,
            contact: None,
            membership: MembershipStatus::Member,
            archived: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn failed_transaction_leaves_state_untouched() {
        let store = InMemoryLedgerStore::new();
        let ctx = MutationContext::new("test");
        let result: LedgerResult<()> = store.transact("test_rollback", &ctx, |state| {
            state.insert_plot(plot("1"));
            Err(LedgerError::validation("nope"))
        });
        assert!(result.is_err());
        assert_eq!(store.snapshot().plots().count(), 0);
    }

    #[test]
    fn abandoned_attempt_never_publishes() {
        let store = InMemoryLedgerStore::new();
        let gate = AttemptGate::new();
        let ctx = MutationContext::new("test").within_attempt(gate.clone());

        let result = store.transact("test_abandon", &ctx, |state| {
            // the deadline passes while the work is still running
            assert!(gate.abandon());
            state.insert_plot(plot("2"));
            Ok(())
        });
        assert_eq!(result, Err(LedgerError::AttemptAbandoned));
        assert_eq!(store.snapshot().plots().count(), 0);

        let result = store.transact("test_abandon", &ctx, |_| Ok(()));
        assert_eq!(result, Err(LedgerError::AttemptAbandoned));
    }

    #[test]
    fn committed_transaction_is_visible_to_new_snapshots() {
        let store = InMemoryLedgerStore::new();
        let before = store.snapshot();
        store
            .transact("test_commit", &MutationContext::new("test"), |state| {
                state.insert_plot(plot("7"));
                Ok(())
            })
            .unwrap();
        assert_eq!(before.plots().count(), 0);
        assert_eq!(store.snapshot().plots().count(), 1);
    }

    #[test]
    fn periods_are_created_once_per_month_and_category() {
        let mut state = LedgerState::default();
        let month = BillingMonth::new(2025, 1).unwrap();
        let first = state.ensure_period(month, ChargeCategory::Membership, None, Utc::now());
        let again = state.ensure_period(
            month,
            ChargeCategory::Membership,
            NaiveDate::from_ymd_opt(2025, 3, 1),
            Utc::now(),
        );
        assert_eq!(first.period_id, again.period_id);
        assert_eq!(again.due_date, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
    }
}
