use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{MySql, MySqlConnection, Pool};

use super::interface::{
    AuthError, IdentityRepository, IssueOutcome, RedeemOutcome, Result, SessionRepository,
    UserRepository, VerificationCodeRepository,
};
use super::model::{
    FederatedIdentity, PolicyTier, Provider, Session, SessionDraft, User, UserId, VerificationCode,
};
use crate::services::hashing;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn insert_user(conn: &mut MySqlConnection, user: &User) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, email_verified, display_name, policy_tier, deleted_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(user.email_verified)
    .bind(&user.display_name)
    .bind(user.policy_tier)
    .bind(user.deleted_at)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_identity(
    conn: &mut MySqlConnection,
    identity: &FederatedIdentity,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO federated_identities (id, user_id, provider, subject, email, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&identity.id)
    .bind(&identity.user_id)
    .bind(&identity.provider)
    .bind(&identity.subject)
    .bind(&identity.email)
    .bind(identity.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_session(conn: &mut MySqlConnection, session: &Session) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, family_id, token_hash, device_info, expires_at, revoked_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.family_id)
    .bind(&session.token_hash)
    .bind(&session.device_info)
    .bind(session.expires_at)
    .bind(session.revoked_at)
    .bind(session.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// USERS
// =============================================================================

pub struct UserCrud {
    pool: Pool<MySql>,
}

impl UserCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for UserCrud {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_display_name(&self, id: &UserId, display_name: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET display_name = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(display_name)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn set_policy_tier(&self, id: &UserId, tier: PolicyTier, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET policy_tier = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(tier)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn soft_delete(&self, id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users SET deleted_at = ?, email = NULL, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM federated_identities WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM usage_periods WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE sessions SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

// =============================================================================
// FEDERATED IDENTITIES
// =============================================================================

pub struct IdentityCrud {
    pool: Pool<MySql>,
}

impl IdentityCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityRepository for IdentityCrud {
    async fn find_owner(&self, provider: Provider, subject: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            JOIN federated_identities f ON f.user_id = u.id
            WHERE f.provider = ? AND f.subject = ? AND u.deleted_at IS NULL
            "#,
        )
        .bind(provider.as_str())
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_user_with_identity(&self, user: &User, identity: &FederatedIdentity) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_user(&mut tx, user).await?;

        // Dropping `tx` on the error path rolls back the user row.
        if let Err(e) = insert_identity(&mut tx, identity).await {
            if is_unique_violation(&e) {
                return Err(AuthError::IdentityAlreadyLinked);
            }
            return Err(e.into());
        }

        tx.commit().await?;
        Ok(())
    }

    async fn link(&self, identity: &FederatedIdentity) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        match insert_identity(&mut conn, identity).await {
            Ok(()) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AuthError::IdentityAlreadyLinked),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FederatedIdentity>> {
        let identities = sqlx::query_as::<_, FederatedIdentity>(
            "SELECT * FROM federated_identities WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(identities)
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

pub struct SessionCrud {
    pool: Pool<MySql>,
}

impl SessionCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SessionCrud {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut conn, session).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn rotate(&self, current_id: &str, replacement: &Session, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The guard makes this a compare-and-set: of two concurrent
        // presentations only one sees a live row.
        let revoked = sqlx::query(
            r#"
            UPDATE sessions SET revoked_at = ?
            WHERE id = ? AND revoked_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(now)
        .bind(current_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            return Ok(false);
        }

        insert_session(&mut tx, replacement).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("UPDATE sessions SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL")
            .bind(now)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_family(&self, family_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("UPDATE sessions SET revoked_at = ? WHERE family_id = ? AND revoked_at IS NULL")
            .bind(now)
            .bind(family_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE user_id = ? AND revoked_at IS NULL AND expires_at > ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ? OR revoked_at < ?")
            .bind(before)
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// VERIFICATION CODES
// =============================================================================

pub struct VerificationCrud {
    pool: Pool<MySql>,
}

impl VerificationCrud {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationCodeRepository for VerificationCrud {
    async fn issue(&self, code: &VerificationCode, min_interval: Duration) -> Result<IssueOutcome> {
        let threshold = code.created_at - min_interval;
        let mut tx = self.pool.begin().await?;

        // The email is the primary key, so the row is replaced in place and a
        // concurrent duplicate can only update the same row. `created_at` is
        // assigned last: MySQL evaluates the list left to right and every
        // condition must see the previous issuance time.
        sqlx::query(
            r#"
            INSERT INTO verification_codes (email, issue_id, code_hash, attempts, expires_at, consumed_at, created_at)
            VALUES (?, ?, ?, 0, ?, NULL, ?)
            ON DUPLICATE KEY UPDATE
                issue_id = IF(created_at <= ?, VALUES(issue_id), issue_id),
                code_hash = IF(created_at <= ?, VALUES(code_hash), code_hash),
                attempts = IF(created_at <= ?, 0, attempts),
                expires_at = IF(created_at <= ?, VALUES(expires_at), expires_at),
                consumed_at = IF(created_at <= ?, NULL, consumed_at),
                created_at = IF(created_at <= ?, VALUES(created_at), created_at)
            "#,
        )
        .bind(&code.email)
        .bind(&code.issue_id)
        .bind(&code.code_hash)
        .bind(code.expires_at)
        .bind(code.created_at)
        .bind(threshold)
        .bind(threshold)
        .bind(threshold)
        .bind(threshold)
        .bind(threshold)
        .bind(threshold)
        .execute(&mut *tx)
        .await?;

        let (issue_id, created_at): (String, DateTime<Utc>) =
            sqlx::query_as("SELECT issue_id, created_at FROM verification_codes WHERE email = ?")
                .bind(&code.email)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        if issue_id == code.issue_id {
            Ok(IssueOutcome::Issued)
        } else {
            Ok(IssueOutcome::Throttled {
                retry_at: created_at + min_interval,
            })
        }
    }

    async fn redeem(
        &self,
        email: &str,
        code_hash: &str,
        max_attempts: u32,
        new_user: &User,
        session: &SessionDraft,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query_as::<_, VerificationCode>(
            "SELECT * FROM verification_codes WHERE email = ? FOR UPDATE",
        )
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = stored else {
            return Ok(RedeemOutcome::NotFound);
        };
        if stored.consumed_at.is_some() {
            return Ok(RedeemOutcome::AlreadyUsed);
        }
        if stored.expires_at <= now {
            return Ok(RedeemOutcome::Expired);
        }
        if stored.attempts >= max_attempts as i32 {
            return Ok(RedeemOutcome::Exhausted);
        }

        if !hashing::digests_match(&stored.code_hash, code_hash) {
            sqlx::query("UPDATE verification_codes SET attempts = attempts + 1 WHERE email = ?")
                .bind(email)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RedeemOutcome::Mismatch);
        }

        sqlx::query("UPDATE verification_codes SET consumed_at = ? WHERE email = ?")
            .bind(now)
            .bind(email)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email = ? AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;

        let (user, created) = match existing {
            Some(mut user) => {
                if !user.email_verified {
                    sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = ? WHERE id = ?")
                        .bind(now)
                        .bind(&user.id)
                        .execute(&mut *tx)
                        .await?;
                    user.email_verified = true;
                    user.updated_at = now;
                }
                (user, false)
            }
            None => {
                insert_user(&mut tx, new_user).await?;
                (new_user.clone(), true)
            }
        };

        // A failed insert drops `tx` and the code stays unconsumed.
        let session = session.for_user(user.id.clone());
        insert_session(&mut tx, &session).await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Redeemed {
            user,
            created,
            session,
        })
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM verification_codes WHERE expires_at < ? OR (consumed_at IS NOT NULL AND consumed_at < ?)",
        )
        .bind(before)
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
