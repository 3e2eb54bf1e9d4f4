//! Job handlers: what each job payload does against the ledger.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::jobs::runner::JobProgress;
use crate::models::{CampaignSummary, DeliveryFailure, JobPayload, JobResult, OfficeJob};
use crate::services::guard::MutationContext;
use crate::services::ledger::BillingLedger;
use crate::services::notifier::{Notifier, OutboundMessage};
use crate::services::store::LedgerStore;

/// Executes one attempt of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &OfficeJob, progress: &JobProgress) -> LedgerResult<JobResult>;
}

/// Runs job payloads against the ledger.
pub struct LedgerJobHandler<S: LedgerStore> {
    ledger: Arc<BillingLedger<S>>,
    notifier: Arc<dyn Notifier>,
}

impl<S: LedgerStore> LedgerJobHandler<S> {
    pub fn new(ledger: Arc<BillingLedger<S>>, notifier: Arc<dyn Notifier>) -> Self {
        Self { ledger, notifier }
    }

    /// Ledger operations are synchronous; keep them off the async workers.
    async fn blocking<T, F>(&self, f: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&BillingLedger<S>) -> LedgerResult<T> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|e| LedgerError::JobHandler(e.to_string()))?
    }

    /// Recipients delivered to by an earlier attempt are skipped, so a
    /// retried campaign never messages anyone twice.
    async fn send_campaign(
        &self,
        messages: Vec<OutboundMessage>,
        progress: &JobProgress,
    ) -> CampaignSummary {
        let mut summary = CampaignSummary {
            attempted: messages.len(),
            ..Default::default()
        };
        let mut delivered: BTreeSet<String> = progress.delivered().into_iter().collect();

        for (i, message) in messages.iter().enumerate() {
            if delivered.contains(&message.recipient) {
                summary.already_sent += 1;
                continue;
            }
            match self.notifier.send(&message.text, &message.recipient).await {
                Ok(()) => {
                    summary.sent += 1;
                    progress.mark_delivered(&message.recipient);
                    delivered.insert(message.recipient.clone());
                }
                Err(err) => {
                    tracing::warn!(recipient = %message.recipient, error = %err, "Campaign delivery failed");
                    summary.failed.push(DeliveryFailure {
                        recipient: message.recipient.clone(),
                        message: err.to_string(),
                    });
                }
            }
            let done = (i + 1) * 90 / summary.attempted;
            progress.set(OfficeJob::PROGRESS_STARTED + done as u8);
        }
        summary
    }
}

#[async_trait]
impl<S: LedgerStore> JobHandler for LedgerJobHandler<S> {
    async fn handle(&self, job: &OfficeJob, progress: &JobProgress) -> LedgerResult<JobResult> {
        let ctx = |reason: Option<String>| {
            MutationContext::with_optional_reason(job.requested_by.clone(), reason)
                .within_attempt(progress.gate().clone())
        };

        match job.payload.clone() {
            JobPayload::ImportStatement { rows, reason } => {
                let ctx = ctx(reason);
                let report = self
                    .blocking(move |ledger| ledger.import_statement(&rows, &ctx))
                    .await?;
                Ok(JobResult::Import { report })
            }
            JobPayload::ImportPayments { rows, reason } => {
                let ctx = ctx(reason);
                let report = self
                    .blocking(move |ledger| ledger.import_payments(&rows, &ctx))
                    .await?;
                Ok(JobResult::Import { report })
            }
            JobPayload::AutoAllocate { request, reason } => {
                let ctx = ctx(reason);
                let summary = self
                    .blocking(move |ledger| ledger.auto_allocate(&request, &ctx))
                    .await?;
                Ok(JobResult::Allocation { summary })
            }
            JobPayload::ApplyPenalty { run, reason } => {
                let ctx = ctx(reason);
                let summary = self
                    .blocking(move |ledger| ledger.apply_penalty(&run, &ctx))
                    .await?;
                Ok(JobResult::Penalty { summary })
            }
            JobPayload::RecalcPenalty { run, reason } => {
                let ctx = ctx(reason);
                let summary = self
                    .blocking(move |ledger| ledger.recalc_penalty(&run, &ctx))
                    .await?;
                Ok(JobResult::Penalty { summary })
            }
            JobPayload::ClosePeriod { month } => {
                let ctx = ctx(None);
                let record = self
                    .blocking(move |ledger| ledger.close_period(month, &ctx))
                    .await?;
                Ok(JobResult::PeriodClosed { record })
            }
            JobPayload::GenerateReceipts { payment_ids } => {
                let receipts = self
                    .blocking(move |ledger| ledger.generate_receipts(&payment_ids))
                    .await?;
                Ok(JobResult::Receipts { receipts })
            }
            JobPayload::SendCampaign { campaign } => {
                let messages = self
                    .blocking(move |ledger| ledger.plan_campaign(&campaign))
                    .await?;
                tracing::info!(job_id = %job.job_id, recipients = messages.len(), "Sending campaign");
                let summary = self.send_campaign(messages, progress).await;
                Ok(JobResult::Campaign { summary })
            }
        }
    }
}
