//! The operation surface used by HTTP handlers and job handlers.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::models::{
    AllocationPreview, AllocationSummary, AutoAllocateRequest, BillingMonth, Campaign, Charge,
    ImportReport, NewCharge, NewPayment, Payment, PaymentRow, PenaltyAccrual, PenaltyPreviewRow,
    PenaltyRun, PenaltySummary, PeriodCloseRecord, PeriodDrift, PeriodStatusView, Plot, PlotDebt,
    PostCloseChange, Receipt, RollbackSummary, StatementRow, UnapplyTarget, UpsertPlot,
};
use crate::services::allocation::AllocationEngine;
use crate::services::clock::Clock;
use crate::services::guard::MutationContext;
use crate::services::import::ImportService;
use crate::services::matching::PlotMatcher;
use crate::services::notifier::{plan_campaign, OutboundMessage};
use crate::services::penalty::PenaltyEngine;
use crate::services::period_close::PeriodCloseManager;
use crate::services::receipts::render_receipt;
use crate::services::registry::Registry;
use crate::services::store::{LedgerState, LedgerStore};

pub struct BillingLedger<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    registry: Registry<S>,
    allocations: AllocationEngine<S>,
    penalties: PenaltyEngine<S>,
    periods: PeriodCloseManager<S>,
    imports: ImportService<S>,
}

impl<S: LedgerStore> BillingLedger<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        matcher: PlotMatcher,
        penalty_policy_version: String,
    ) -> Self {
        Self {
            registry: Registry::new(store.clone(), clock.clone(), matcher.clone()),
            allocations: AllocationEngine::new(store.clone(), clock.clone()),
            penalties: PenaltyEngine::new(store.clone(), clock.clone(), penalty_policy_version),
            periods: PeriodCloseManager::new(store.clone(), clock.clone()),
            imports: ImportService::new(store.clone(), clock.clone(), matcher),
            store,
            clock,
        }
    }

    pub fn snapshot(&self) -> Arc<LedgerState> {
        self.store.snapshot()
    }

    // Registry

    pub fn upsert_plot(&self, input: UpsertPlot, ctx: &MutationContext) -> LedgerResult<Plot> {
        self.registry.upsert_plot(input, ctx)
    }

    pub fn archive_plot(&self, plot_id: Uuid, ctx: &MutationContext) -> LedgerResult<Plot> {
        self.registry.archive_plot(plot_id, ctx)
    }

    pub fn list_plots(&self, include_archived: bool) -> Vec<Plot> {
        self.registry.list_plots(include_archived)
    }

    pub fn create_charge(&self, input: NewCharge, ctx: &MutationContext) -> LedgerResult<Charge> {
        self.registry.create_charge(input, ctx)
    }

    pub fn create_payment(&self, input: NewPayment, ctx: &MutationContext) -> LedgerResult<Payment> {
        self.registry.create_payment(input, ctx)
    }

    pub fn payment(&self, payment_id: Uuid) -> LedgerResult<Payment> {
        self.registry.payment(payment_id)
    }

    pub fn void_payment(&self, payment_id: Uuid, ctx: &MutationContext) -> LedgerResult<Payment> {
        self.registry.void_payment(payment_id, ctx)
    }

    pub fn assign_plot(
        &self,
        payment_id: Uuid,
        plot_id: Uuid,
        ctx: &MutationContext,
    ) -> LedgerResult<Payment> {
        self.registry.assign_plot(payment_id, plot_id, ctx)
    }

    pub fn set_auto_allocate_disabled(
        &self,
        payment_id: Uuid,
        disabled: bool,
        ctx: &MutationContext,
    ) -> LedgerResult<Payment> {
        self.registry
            .set_auto_allocate_disabled(payment_id, disabled, ctx)
    }

    // Allocation

    pub fn preview_allocation(&self, request: &AutoAllocateRequest) -> AllocationPreview {
        self.allocations.preview(request)
    }

    pub fn auto_allocate(
        &self,
        request: &AutoAllocateRequest,
        ctx: &MutationContext,
    ) -> LedgerResult<AllocationSummary> {
        self.allocations.auto_allocate(request, ctx)
    }

    pub fn manual_allocate(
        &self,
        payment_id: Uuid,
        charge_id: Uuid,
        amount: Decimal,
        ctx: &MutationContext,
    ) -> LedgerResult<AllocationSummary> {
        self.allocations
            .manual_allocate(payment_id, charge_id, amount, ctx)
    }

    pub fn unapply(
        &self,
        target: UnapplyTarget,
        ctx: &MutationContext,
    ) -> LedgerResult<AllocationSummary> {
        self.allocations.unapply(target, ctx)
    }

    // Penalties

    pub fn preview_penalty(&self, run: &PenaltyRun) -> LedgerResult<Vec<PenaltyPreviewRow>> {
        self.penalties.preview(run)
    }

    pub fn apply_penalty(&self, run: &PenaltyRun, ctx: &MutationContext) -> LedgerResult<PenaltySummary> {
        self.penalties.apply(run, ctx)
    }

    pub fn recalc_penalty(&self, run: &PenaltyRun, ctx: &MutationContext) -> LedgerResult<PenaltySummary> {
        self.penalties.recalc(run, ctx)
    }

    pub fn void_penalty(&self, penalty_id: Uuid, ctx: &MutationContext) -> LedgerResult<PenaltyAccrual> {
        self.penalties.void(penalty_id, ctx)
    }

    pub fn freeze_penalty(&self, penalty_id: Uuid, ctx: &MutationContext) -> LedgerResult<PenaltyAccrual> {
        self.penalties.freeze(penalty_id, ctx)
    }

    pub fn unfreeze_penalty(&self, penalty_id: Uuid, ctx: &MutationContext) -> LedgerResult<PenaltyAccrual> {
        self.penalties.unfreeze(penalty_id, ctx)
    }

    pub fn plot_debts(&self) -> Vec<PlotDebt> {
        self.penalties.plot_debts()
    }

    // Periods

    pub fn close_period(&self, month: BillingMonth, ctx: &MutationContext) -> LedgerResult<PeriodCloseRecord> {
        self.periods.close(month, ctx)
    }

    pub fn period_status(&self, month: BillingMonth) -> PeriodStatusView {
        self.periods.status(month)
    }

    pub fn period_drift(&self, month: BillingMonth) -> LedgerResult<PeriodDrift> {
        self.periods.drift(month)
    }

    pub fn post_close_changes(&self, month: BillingMonth) -> Vec<PostCloseChange> {
        self.periods.changes(month)
    }

    // Imports

    pub fn import_statement(
        &self,
        rows: &[StatementRow],
        ctx: &MutationContext,
    ) -> LedgerResult<ImportReport> {
        self.imports.import_statement(rows, ctx)
    }

    pub fn import_payments(
        &self,
        rows: &[PaymentRow],
        ctx: &MutationContext,
    ) -> LedgerResult<ImportReport> {
        self.imports.import_payments(rows, ctx)
    }

    pub fn rollback_import(&self, batch_id: Uuid, ctx: &MutationContext) -> LedgerResult<RollbackSummary> {
        self.imports.rollback(batch_id, ctx)
    }

    // Documents and messages

    pub fn generate_receipts(&self, payment_ids: &[Uuid]) -> LedgerResult<Vec<Receipt>> {
        let state = self.store.snapshot();
        let issued = self.clock.now();
        payment_ids
            .iter()
            .map(|id| render_receipt(&state, *id, issued))
            .collect()
    }

    pub fn plan_campaign(&self, campaign: &Campaign) -> LedgerResult<Vec<OutboundMessage>> {
        plan_campaign(&self.store.snapshot(), campaign)
    }
}
