//! Who is changing the ledger and why, plus the closed-period check that
//! every mutating operation goes through.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{BillingMonth, EntityType};
use crate::services::store::LedgerState;

const ATTEMPT_OPEN: u8 = 0;
const ATTEMPT_COMMITTED: u8 = 1;
const ATTEMPT_ABANDONED: u8 = 2;

/// Settles, exactly once, whether a job attempt's ledger work is published
/// or abandoned. The store claims it before publishing a transaction; the
/// job runner claims it when the attempt runs out of time.
#[derive(Debug, Clone, Default)]
pub struct AttemptGate(Arc<AtomicU8>);

impl AttemptGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// False once the attempt has been abandoned.
    pub fn claim_commit(&self) -> bool {
        match self.0.compare_exchange(
            ATTEMPT_OPEN,
            ATTEMPT_COMMITTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(state) => state == ATTEMPT_COMMITTED,
        }
    }

    /// False if the attempt already committed; it must then run to the end.
    pub fn abandon(&self) -> bool {
        match self.0.compare_exchange(
            ATTEMPT_OPEN,
            ATTEMPT_ABANDONED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(state) => state == ATTEMPT_ABANDONED,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.0.load(Ordering::Acquire) == ATTEMPT_ABANDONED
    }
}

#[derive(Debug, Clone)]
pub struct MutationContext {
    pub actor: String,
    pub reason: Option<String>,
    /// Set when the mutation runs inside a job attempt.
    pub attempt: Option<AttemptGate>,
}

impl MutationContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            reason: None,
            attempt: None,
        }
    }

    /// Actor plus the optional reason of a request body.
    pub fn with_optional_reason(actor: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            reason,
            ..Self::new(actor)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn within_attempt(mut self, gate: AttemptGate) -> Self {
        self.attempt = Some(gate);
        self
    }

    /// Fails once the surrounding job attempt has been abandoned.
    pub fn ensure_live(&self) -> LedgerResult<()> {
        match &self.attempt {
            Some(gate) if gate.is_abandoned() => Err(LedgerError::AttemptAbandoned),
            _ => Ok(()),
        }
    }

    /// Claim the right to publish. Always granted outside a job attempt.
    pub fn claim_commit(&self) -> LedgerResult<()> {
        match &self.attempt {
            Some(gate) if !gate.claim_commit() => Err(LedgerError::AttemptAbandoned),
            _ => Ok(()),
        }
    }

    /// The trimmed reason, if a non-blank one was given.
    pub fn reason(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// For operations that always need a reason (voids, freezes, rollbacks).
    pub fn require_reason(&self, action: &str) -> LedgerResult<&str> {
        self.reason()
            .ok_or_else(|| LedgerError::validation(format!("a reason is required to {}", action)))
    }
}

/// Fails with `PeriodClosedRequiresReason` when any of `months` is closed and
/// the context carries no reason. Returns the closed months that will be
/// touched so callers can log post-close changes against them.
pub fn ensure_mutable<I>(
    state: &LedgerState,
    months: I,
    ctx: &MutationContext,
) -> LedgerResult<BTreeSet<BillingMonth>>
where
    I: IntoIterator<Item = BillingMonth>,
{
    let closed: BTreeSet<BillingMonth> = months
        .into_iter()
        .filter(|month| state.is_closed(*month))
        .collect();
    if let Some(first) = closed.iter().next() {
        if ctx.reason().is_none() {
            return Err(LedgerError::PeriodClosedRequiresReason { month: *first });
        }
    }
    Ok(closed)
}

/// Record a change against `month` if that month is closed.
pub fn note_change(
    state: &mut LedgerState,
    month: BillingMonth,
    entity_type: EntityType,
    entity_id: Uuid,
    action: &str,
    ctx: &MutationContext,
    at: DateTime<Utc>,
) -> bool {
    if !state.is_closed(month) {
        return false;
    }
    state.push_post_close_change(month, entity_type, entity_id, action, ctx, at);
    true
}
