use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::modules::auth::model::PolicyTier;
use crate::services::quota::QuotaStatus;

#[derive(Debug, Serialize)]
pub struct QuotaStatusResponse {
    pub tier: PolicyTier,
    /// `None` for unmetered tiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    pub used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub allowed: bool,
    #[serde(flatten)]
    pub status: QuotaStatusResponse,
}

impl From<QuotaStatus> for QuotaStatusResponse {
    fn from(status: QuotaStatus) -> Self {
        Self {
            tier: status.tier,
            limit: status.limit,
            used: status.used,
            remaining: status.remaining(),
            resets_at: status.resets_at,
        }
    }
}
