use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::domain::MatchStatus;

/// Request to run the matching engine, optionally scoped to one demand
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RunMatchingRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "demand_id", rename = "demandId", default)]
    pub demand_id: Option<String>,
}

/// Request to change the auto-match period
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SetIntervalRequest {
    #[validate(range(min = 1, max = 1440))]
    pub minutes: u64,
}

/// Request to move a match along its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: MatchStatus,
}

/// Request to delete several matches at once
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkDeleteRequest {
    #[validate(length(max = 10000))]
    pub ids: Vec<String>,
}
