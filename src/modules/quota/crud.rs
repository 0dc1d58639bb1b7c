use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{MySql, Pool};
use uuid::Uuid;

use super::interface::{QuotaDecision, UsageRepository};
use super::model::UsagePeriod;
use crate::modules::auth::interface::Result;
use crate::modules::auth::model::UserId;

pub struct UsageCrud {
    pool: Pool<MySql>,
}

impl UsageCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for UsageCrud {
    async fn consume(
        &self,
        user_id: &UserId,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        let grant_id = Uuid::new_v4().to_string();
        let period_end = now + window;
        let mut tx = self.pool.begin().await?;

        // The duplicate-key path holds the row lock for the whole statement.
        // `grant_id` is assigned first so it sees the old count and end, and
        // `period_end` last so every other column sees the old end.
        sqlx::query(
            r#"
            INSERT INTO usage_periods (user_id, grant_id, period_start, period_end, request_count)
            VALUES (?, ?, ?, ?, 1)
            ON DUPLICATE KEY UPDATE
                grant_id = IF(period_end <= ? OR request_count < ?, VALUES(grant_id), grant_id),
                request_count = IF(period_end <= ?, 1, IF(request_count < ?, request_count + 1, request_count)),
                period_start = IF(period_end <= ?, VALUES(period_start), period_start),
                period_end = IF(period_end <= ?, VALUES(period_end), period_end)
            "#,
        )
        .bind(user_id)
        .bind(&grant_id)
        .bind(now)
        .bind(period_end)
        .bind(now)
        .bind(limit)
        .bind(now)
        .bind(limit)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let period = sqlx::query_as::<_, UsagePeriod>("SELECT * FROM usage_periods WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if period.grant_id == grant_id {
            Ok(QuotaDecision::Allowed(period))
        } else {
            Ok(QuotaDecision::Exceeded(period))
        }
    }

    async fn current(&self, user_id: &UserId) -> Result<Option<UsagePeriod>> {
        let period = sqlx::query_as::<_, UsagePeriod>("SELECT * FROM usage_periods WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(period)
    }
}
