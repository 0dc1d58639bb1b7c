use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::modules::auth::model::UserId;

/// The user's current metering window. One row per user; a consume after
/// `period_end` starts the next window in place.
#[derive(Debug, Clone, FromRow)]
pub struct UsagePeriod {
    pub user_id: UserId,
    /// Token of the last consume that was granted.
    pub grant_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub request_count: u32,
}

impl UsagePeriod {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.period_end
    }

    /// Requests counted against `now`; a closed window counts as empty.
    pub fn used_at(&self, now: DateTime<Utc>) -> u32 {
        if self.is_open(now) {
            self.request_count
        } else {
            0
        }
    }
}
