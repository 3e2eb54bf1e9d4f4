//! Domain models for billing-ledger-service.

mod allocation;
mod audit;
mod campaign;
mod charge;
mod import;
mod job;
mod payment;
mod penalty;
mod period;
mod period_close;
mod plot;

pub use allocation::{
    Allocation, AllocationKind, AllocationLine, AllocationPreview, AllocationSummary,
    AutoAllocateRequest, UnapplyTarget,
};
pub use audit::{AuditEntry, EntityType};
pub use campaign::{
    Campaign, CampaignAudience, CampaignSummary, DeliveryFailure, PlotDebt, Receipt,
};
pub use charge::{Charge, NewCharge};
pub use import::{
    Direction, ImportBatch, ImportReport, ImportSource, ImportTotals, PaymentRow, RollbackSummary,
    RowError, StatementRow,
};
pub use job::{JobPayload, JobResult, JobStatus, JobTransition, JobType, OfficeJob};
pub use payment::{AllocationStatus, MatchStatus, NewPayment, Payment, PaymentMethod};
pub use penalty::{
    PenaltyAccrual, PenaltyComputation, PenaltyPreviewRow, PenaltyRun, PenaltyStatus,
    PenaltySummary,
};
pub use period::{AccrualPeriod, BillingMonth, ChargeCategory};
pub use period_close::{
    PeriodAggregates, PeriodCloseRecord, PeriodDrift, PeriodStatus, PeriodStatusView,
    PostCloseChange,
};
pub use plot::{MembershipStatus, Plot, UpsertPlot};
