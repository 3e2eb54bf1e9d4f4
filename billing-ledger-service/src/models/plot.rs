//! Plot registry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Membership status of the plot holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Member,
    NonMember,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::NonMember => "non_member",
        }
    }
}

/// A billable unit. Plots are never deleted, only archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plot {
    pub plot_id: Uuid,
    /// Plot code as written on the site plan, e.g. `12` or `12а`.
    pub number: String,
    pub street: Option<String>,
    pub label: String,
    pub owner_name: Option<String>,
    /// Where campaign messages go; delivery channel is external.
    pub contact: Option<String>,
    pub membership: MembershipStatus,
    pub archived: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for registering or updating a plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertPlot {
    pub plot_id: Option<Uuid>,
    pub number: String,
    pub street: Option<String>,
    pub label: Option<String>,
    pub owner_name: Option<String>,
    pub contact: Option<String>,
    pub membership: MembershipStatus,
}
