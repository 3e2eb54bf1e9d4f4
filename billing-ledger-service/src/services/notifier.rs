//! Outbound messages: the delivery capability and campaign planning.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Campaign, CampaignAudience};
use crate::services::penalty::plot_debts;
use crate::services::store::LedgerState;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

/// Delivery channel for campaign messages. Channels themselves (SMS, email,
/// messengers) live outside the ledger.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str, recipient: &str) -> Result<(), NotifierError>;
}

/// Writes deliveries to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogNotifier {
    send_count: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str, recipient: &str) -> Result<(), NotifierError> {
        if recipient.trim().is_empty() {
            return Err(NotifierError::InvalidRecipient(
                "recipient is empty".to_string(),
            ));
        }
        self.send_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            to = %recipient,
            body_length = text.len(),
            "[LOG] Notification would be sent"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: String,
    pub text: String,
}

/// Fill `{plot}` and `{debt}` in a campaign template.
pub fn render_template(template: &str, plot: &str, debt: Decimal) -> String {
    template
        .replace("{plot}", plot)
        .replace("{debt}", &debt.round_dp(2).to_string())
}

/// Resolve the audience and render one message per recipient.
pub fn plan_campaign(state: &LedgerState, campaign: &Campaign) -> LedgerResult<Vec<OutboundMessage>> {
    if campaign.template.trim().is_empty() {
        return Err(LedgerError::validation("campaign template must not be empty"));
    }
    let debts = plot_debts(state);
    let debt_of = |plot_id: Uuid| {
        debts
            .iter()
            .find(|d| d.plot_id == plot_id)
            .map(|d| d.total_debt)
            .unwrap_or(Decimal::ZERO)
    };

    match &campaign.audience {
        CampaignAudience::Recipients { recipients } => Ok(recipients
            .iter()
            .map(|recipient| {
                let plot = state
                    .plots()
                    .find(|p| p.contact.as_deref() == Some(recipient.as_str()));
                let (label, debt) = plot
                    .map(|p| (p.label.clone(), debt_of(p.plot_id)))
                    .unwrap_or_default();
                OutboundMessage {
                    recipient: recipient.clone(),
                    text: render_template(&campaign.template, &label, debt),
                }
            })
            .collect()),
        CampaignAudience::Debtors { min_debt } => Ok(debts
            .iter()
            .filter(|d| d.total_debt >= *min_debt)
            .filter_map(|d| {
                let plot = state.plot(d.plot_id).ok()?;
                let contact = plot.contact.as_deref().filter(|c| !c.trim().is_empty())?;
                Some(OutboundMessage {
                    recipient: contact.to_string(),
                    text: render_template(&campaign.template, &plot.label, d.total_debt),
                })
            })
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_placeholders_are_filled() {
        let text = render_template("Plot {plot}: you owe {debt}", "Oak 12", Decimal::new(312346, 3));
        assert_eq!(text, "Plot Oak 12: you owe 312.35");
    }

    #[tokio::test]
    async fn log_notifier_counts_deliveries() {
        let notifier = LogNotifier::new();
        notifier.send("hello", "+100000").await.unwrap();
        assert!(notifier.send("hello", " ").await.is_err());
        assert_eq!(notifier.send_count(), 1);
    }
}
