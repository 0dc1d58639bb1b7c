use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TierPolicies;
use crate::modules::auth::interface::{AuthError, Result, UserRepository};
use crate::modules::auth::model::{PolicyTier, UserId};
use crate::modules::quota::interface::{QuotaDecision, UsageRepository};
use crate::modules::quota::model::UsagePeriod;
use crate::services::clock::Clock;
use crate::services::metrics::MetricsRegistry;

/// Usage of the metered feature as seen at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStatus {
    pub tier: PolicyTier,
    /// `None` for unmetered tiers.
    pub limit: Option<u32>,
    pub used: u32,
    pub resets_at: Option<DateTime<Utc>>,
}

impl QuotaStatus {
    fn unlimited() -> Self {
        Self {
            tier: PolicyTier::Unlimited,
            limit: None,
            used: 0,
            resets_at: None,
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Rolling per-user cap on the AI-assisted search feature.
pub struct QuotaService {
    usage: Arc<dyn UsageRepository>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    tiers: TierPolicies,
}

impl QuotaService {
    pub fn new(
        usage: Arc<dyn UsageRepository>,
        users: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
        tiers: TierPolicies,
    ) -> Self {
        Self {
            usage,
            users,
            clock,
            metrics,
            tiers,
        }
    }

    async fn tier_of(&self, user_id: &UserId) -> Result<PolicyTier> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok(user.policy_tier)
    }

    /// Counts one use under the given tier, or fails with `QuotaExceeded`.
    /// Unlimited users never touch the usage table.
    pub async fn check_and_consume(&self, user_id: &UserId, tier: PolicyTier) -> Result<QuotaStatus> {
        let Some(policy) = self.tiers.for_tier(tier) else {
            self.metrics.record_quota(tier.as_str(), "unmetered");
            return Ok(QuotaStatus::unlimited());
        };

        let now = self.clock.now();
        match self.usage.consume(user_id, policy.limit, policy.window, now).await? {
            QuotaDecision::Allowed(period) => {
                self.metrics.record_quota(tier.as_str(), "allowed");
                tracing::debug!(user_id = %user_id, count = period.request_count, "quota consumed");
                Ok(status_of(tier, policy.limit, &period, now))
            }
            QuotaDecision::Exceeded(period) => {
                self.metrics.record_quota(tier.as_str(), "exceeded");
                tracing::warn!(user_id = %user_id, resets_at = %period.period_end, "quota exhausted");
                Err(AuthError::QuotaExceeded {
                    resets_at: period.period_end,
                })
            }
        }
    }

    /// `check_and_consume` under the user's stored tier.
    pub async fn consume(&self, user_id: &UserId) -> Result<QuotaStatus> {
        let tier = self.tier_of(user_id).await?;
        self.check_and_consume(user_id, tier).await
    }

    /// Current usage without consuming anything.
    pub async fn status(&self, user_id: &UserId) -> Result<QuotaStatus> {
        let tier = self.tier_of(user_id).await?;
        let Some(policy) = self.tiers.for_tier(tier) else {
            return Ok(QuotaStatus::unlimited());
        };

        let now = self.clock.now();
        let status = match self.usage.current(user_id).await? {
            Some(period) => status_of(tier, policy.limit, &period, now),
            None => QuotaStatus {
                tier,
                limit: Some(policy.limit),
                used: 0,
                resets_at: None,
            },
        };
        Ok(status)
    }
}

fn status_of(tier: PolicyTier, limit: u32, period: &UsagePeriod, now: DateTime<Utc>) -> QuotaStatus {
    QuotaStatus {
        tier,
        limit: Some(limit),
        used: period.used_at(now),
        resets_at: period.is_open(now).then_some(period.period_end),
    }
}
