//! Plain-text payment receipts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Payment, Receipt};
use crate::services::store::LedgerState;

fn receipt_number(payment: &Payment) -> String {
    format!("R-{}-{:06}", payment.paid_on.format("%Y%m%d"), payment.seq)
}

/// Render the receipt for one payment, listing the charges it currently pays.
pub fn render_receipt(
    state: &LedgerState,
    payment_id: Uuid,
    issued_utc: DateTime<Utc>,
) -> LedgerResult<Receipt> {
    let payment = state.payment(payment_id)?;
    if payment.is_voided {
        return Err(LedgerError::InvalidTransition {
            entity: "payment",
            action: "issue a receipt for",
            status: "voided",
        });
    }

    let mut applied: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for allocation in state.allocations_for_payment(payment_id) {
        *applied.entry(allocation.charge_id).or_default() += allocation.amount;
    }
    let mut lines = Vec::new();
    for (charge_id, amount) in applied.into_iter().filter(|(_, a)| *a > Decimal::ZERO) {
        let charge = state.charge(charge_id)?;
        lines.push((charge.month, charge.category, charge.seq, amount));
    }
    lines.sort_by_key(|(month, _, seq, _)| (*month, *seq));

    let number = receipt_number(payment);
    let plot = payment
        .matched_plot_id
        .and_then(|id| state.plot(id).ok())
        .map(|p| p.label.clone())
        .unwrap_or_else(|| "-".to_string());

    let mut body = String::new();
    body.push_str(&format!("Receipt {}\n", number));
    body.push_str(&format!("Date: {}\n", payment.paid_on));
    body.push_str(&format!("Received from: {}\n", payment.payer));
    body.push_str(&format!("Plot: {}\n", plot));
    body.push_str(&format!("Amount: {:.2}\n", payment.amount));
    body.push_str(&format!("Method: {}\n", payment.method.as_str()));
    if !payment.purpose.trim().is_empty() {
        body.push_str(&format!("Purpose: {}\n", payment.purpose.trim()));
    }
    if !lines.is_empty() {
        body.push_str("Applied to:\n");
        for (month, category, _, amount) in &lines {
            body.push_str(&format!("  {} {:<12} {:>12.2}\n", month, category.as_str(), amount));
        }
    }
    body.push_str(&format!("Unapplied: {:.2}\n", payment.remaining_amount));

    Ok(Receipt {
        payment_id,
        number,
        paid_on: payment.paid_on,
        amount: payment.amount,
        method: payment.method,
        body,
        issued_utc,
    })
}
