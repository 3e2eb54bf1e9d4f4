use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{MembershipStatus, UpsertPlot};

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertPlotRequest {
    pub plot_id: Option<Uuid>,

    #[validate(length(min = 1, max = 16, message = "Plot number must be 1-16 characters"))]
    pub number: String,

    #[validate(length(max = 120, message = "Street is too long"))]
    pub street: Option<String>,

    #[validate(length(max = 200, message = "Label is too long"))]
    pub label: Option<String>,

    pub owner_name: Option<String>,

    #[validate(length(max = 200, message = "Contact is too long"))]
    pub contact: Option<String>,

    pub membership: MembershipStatus,
}

impl From<UpsertPlotRequest> for UpsertPlot {
    fn from(req: UpsertPlotRequest) -> Self {
        Self {
            plot_id: req.plot_id,
            number: req.number,
            street: req.street,
            label: req.label,
            owner_name: req.owner_name,
            contact: req.contact,
            membership: req.membership,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PlotListParams {
    #[serde(default)]
    pub include_archived: bool,
}
