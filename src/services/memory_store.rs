use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::modules::auth::interface::{
    AuthError, IdentityRepository, IssueOutcome, RedeemOutcome, Result, SessionRepository,
    UserRepository, VerificationCodeRepository,
};
use crate::modules::auth::model::{
    FederatedIdentity, PolicyTier, Provider, Session, SessionDraft, User, UserId, VerificationCode,
};
use crate::modules::quota::interface::{QuotaDecision, UsageRepository};
use crate::modules::quota::model::UsagePeriod;
use crate::services::hashing;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    identities: Vec<FederatedIdentity>,
    sessions: HashMap<String, Session>,
    codes: HashMap<String, VerificationCode>,
    usage: HashMap<UserId, UsagePeriod>,
}

impl Tables {
    fn live_user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id).filter(|u| !u.is_deleted())
    }

    fn live_user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| !u.is_deleted() && u.email.as_deref() == Some(email))
    }

    fn identity_taken(&self, identity: &FederatedIdentity) -> bool {
        self.identities
            .iter()
            .any(|i| i.provider == identity.provider && i.subject == identity.subject)
    }

    /// Mirrors the primary key and the token-hash unique key of `sessions`.
    fn check_session_keys(&self, id: &str, token_hash: &str) -> Result<()> {
        if self.sessions.contains_key(id) || self.sessions.values().any(|s| s.token_hash == token_hash) {
            return Err(AuthError::Internal(format!("duplicate session key for {id}")));
        }
        Ok(())
    }

    fn insert_session(&mut self, session: &Session) -> Result<()> {
        self.check_session_keys(&session.id, &session.token_hash)?;
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }
}

/// Process-local store implementing every repository trait.
///
/// A single lock covers all tables, so each trait method is atomic in the
/// same sense as its MySQL transaction. Used by tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows ever created, deleted ones included.
    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    pub async fn code_count(&self) -> usize {
        self.tables.lock().await.codes.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.tables.lock().await.live_user(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.tables.lock().await.live_user_by_email(email).cloned())
    }

    async fn update_display_name(&self, id: &UserId, display_name: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(id)
            .filter(|u| !u.is_deleted())
            .ok_or(AuthError::UserNotFound)?;
        user.display_name = display_name.map(str::to_string);
        user.updated_at = now;
        Ok(())
    }

    async fn set_policy_tier(&self, id: &UserId, tier: PolicyTier, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(id)
            .filter(|u| !u.is_deleted())
            .ok_or(AuthError::UserNotFound)?;
        user.policy_tier = tier;
        user.updated_at = now;
        Ok(())
    }

    async fn soft_delete(&self, id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(id) {
            Some(user) if !user.is_deleted() => {
                user.deleted_at = Some(now);
                user.email = None;
                user.updated_at = now;
            }
            _ => return Ok(false),
        }

        tables.identities.retain(|i| &i.user_id != id);
        tables.usage.remove(id);
        for session in tables.sessions.values_mut() {
            if &session.user_id == id && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl IdentityRepository for MemoryStore {
    async fn find_owner(&self, provider: Provider, subject: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        let owner = tables
            .identities
            .iter()
            .find(|i| i.provider == provider.as_str() && i.subject == subject)
            .and_then(|i| tables.live_user(&i.user_id))
            .cloned();
        Ok(owner)
    }

    async fn create_user_with_identity(&self, user: &User, identity: &FederatedIdentity) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.identity_taken(identity) {
            return Err(AuthError::IdentityAlreadyLinked);
        }
        tables.users.insert(user.id.clone(), user.clone());
        tables.identities.push(identity.clone());
        Ok(())
    }

    async fn link(&self, identity: &FederatedIdentity) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.identity_taken(identity) {
            return Err(AuthError::IdentityAlreadyLinked);
        }
        tables.identities.push(identity.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FederatedIdentity>> {
        let tables = self.tables.lock().await;
        let mut identities: Vec<_> = tables
            .identities
            .iter()
            .filter(|i| &i.user_id == user_id)
            .cloned()
            .collect();
        identities.sort_by_key(|i| i.created_at);
        Ok(identities)
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(&self, session: &Session) -> Result<()> {
        self.tables.lock().await.insert_session(session)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(id).cloned())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn rotate(&self, current_id: &str, replacement: &Session, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(current_id) {
            Some(current) if current.is_live(now) => {}
            _ => return Ok(false),
        }
        tables.check_session_keys(&replacement.id, &replacement.token_hash)?;

        if let Some(current) = tables.sessions.get_mut(current_id) {
            current.revoked_at = Some(now);
        }
        tables
            .sessions
            .insert(replacement.id.clone(), replacement.clone());
        Ok(true)
    }

    async fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(id) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut revoked = 0;
        for session in tables.sessions.values_mut() {
            if &session.user_id == user_id && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_family(&self, family_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut revoked = 0;
        for session in tables.sessions.values_mut() {
            if session.family_id == family_id && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_active_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<_> = tables
            .sessions
            .values()
            .filter(|s| &s.user_id == user_id && s.is_live(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let len = tables.sessions.len();
        tables
            .sessions
            .retain(|_, s| s.expires_at >= before && !matches!(s.revoked_at, Some(r) if r < before));
        Ok((len - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl VerificationCodeRepository for MemoryStore {
    async fn issue(&self, code: &VerificationCode, min_interval: Duration) -> Result<IssueOutcome> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.codes.get(&code.email) {
            if existing.created_at > code.created_at - min_interval {
                return Ok(IssueOutcome::Throttled {
                    retry_at: existing.created_at + min_interval,
                });
            }
        }
        tables.codes.insert(code.email.clone(), code.clone());
        Ok(IssueOutcome::Issued)
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
        let mut tables = self.tables.lock().await;
        // Everything that can fail is checked before the first write, which
        // stands in for the transaction rollback.
        let session_keys = tables.check_session_keys(&session.id, &session.token_hash);

        let Some(stored) = tables.codes.get_mut(email) else {
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
            stored.attempts += 1;
            return Ok(RedeemOutcome::Mismatch);
        }
        session_keys?;
        stored.consumed_at = Some(now);

        let existing = tables.live_user_by_email(email).map(|u| u.id.clone());
        let (user, created) = match existing {
            Some(id) => {
                let user = tables
                    .users
                    .get_mut(&id)
                    .ok_or_else(|| AuthError::Internal("user vanished under lock".to_string()))?;
                if !user.email_verified {
                    user.email_verified = true;
                    user.updated_at = now;
                }
                (user.clone(), false)
            }
            None => {
                tables.users.insert(new_user.id.clone(), new_user.clone());
                (new_user.clone(), true)
            }
        };

        let session = session.for_user(user.id.clone());
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(RedeemOutcome::Redeemed {
            user,
            created,
            session,
        })
    }

    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let len = tables.codes.len();
        tables
            .codes
            .retain(|_, c| c.expires_at >= before && !matches!(c.consumed_at, Some(t) if t < before));
        Ok((len - tables.codes.len()) as u64)
    }
}

#[async_trait]
impl UsageRepository for MemoryStore {
    async fn consume(
        &self,
        user_id: &UserId,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        let mut tables = self.tables.lock().await;
        let grant_id = Uuid::new_v4().to_string();

        let period = tables
            .usage
            .entry(user_id.clone())
            .or_insert_with(|| UsagePeriod {
                user_id: user_id.clone(),
                grant_id: String::new(),
                period_start: now,
                period_end: now + window,
                request_count: 0,
            });

        if period.period_end <= now {
            period.period_start = now;
            period.period_end = now + window;
            period.request_count = 0;
        }

        if period.request_count < limit {
            period.request_count += 1;
            period.grant_id = grant_id;
            Ok(QuotaDecision::Allowed(period.clone()))
        } else {
            Ok(QuotaDecision::Exceeded(period.clone()))
        }
    }

    async fn current(&self, user_id: &UserId) -> Result<Option<UsagePeriod>> {
        Ok(self.tables.lock().await.usage.get(user_id).cloned())
    }
}
