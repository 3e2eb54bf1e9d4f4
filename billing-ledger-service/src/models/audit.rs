//! Append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Plot,
    Charge,
    Payment,
    Allocation,
    PenaltyAccrual,
    Period,
    ImportBatch,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plot => "plot",
            Self::Charge => "charge",
            Self::Payment => "payment",
            Self::Allocation => "allocation",
            Self::PenaltyAccrual => "penalty_accrual",
            Self::Period => "period",
            Self::ImportBatch => "import_batch",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub entity_type: EntityType,
    /// Uuid of the entity, or the month for period entries.
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub reason: Option<String>,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}
