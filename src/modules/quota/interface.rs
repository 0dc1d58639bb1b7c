use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::model::UsagePeriod;
use crate::modules::auth::interface::Result;
use crate::modules::auth::model::UserId;

#[derive(Debug, Clone)]
pub enum QuotaDecision {
    Allowed(UsagePeriod),
    Exceeded(UsagePeriod),
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Creates the period, restarts an ended one, or increments an open one
    /// below `limit`, as one atomic step. The returned period is the state
    /// after the step.
    async fn consume(
        &self,
        user_id: &UserId,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision>;
    async fn current(&self, user_id: &UserId) -> Result<Option<UsagePeriod>>;
}
