use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::AuthPolicy;
use crate::modules::auth::interface::{AuthError, Result, SessionRepository, TokenPair};
use crate::modules::auth::model::{Session, SessionDraft, UserId};
use crate::services::clock::Clock;
use crate::services::hashing;
use crate::services::jwt::JwtService;
use crate::services::metrics::MetricsRegistry;

/// Refresh-token lifecycle: issue on login, one-time rotation, revocation.
pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    jwt: Arc<JwtService>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    refresh_token_ttl: Duration,
    reuse_revokes_family: bool,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        jwt: Arc<JwtService>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
        policy: &AuthPolicy,
    ) -> Self {
        Self {
            sessions,
            jwt,
            clock,
            metrics,
            refresh_token_ttl: policy.refresh_token_ttl,
            reuse_revokes_family: policy.reuse_revokes_family,
        }
    }

    /// A fresh refresh token and the session that will hold its hash. The
    /// token is returned in plaintext exactly once.
    pub fn draft(&self, device_info: Option<String>) -> (String, SessionDraft) {
        self.draft_in_family(Uuid::new_v4().to_string(), device_info, self.clock.now())
    }

    fn draft_in_family(
        &self,
        family_id: String,
        device_info: Option<String>,
        now: DateTime<Utc>,
    ) -> (String, SessionDraft) {
        let refresh_token = hashing::generate_refresh_token();
        let draft = SessionDraft {
            id: Uuid::new_v4().to_string(),
            family_id,
            token_hash: hashing::hash_refresh_token(&refresh_token),
            device_info,
            expires_at: now + self.refresh_token_ttl,
            created_at: now,
        };
        (refresh_token, draft)
    }

    fn token_pair(&self, refresh_token: String, session: &Session) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.jwt.create_access_token(&session.user_id)?,
            refresh_token,
            expires_in: self.jwt.get_access_token_duration_secs(),
            session_id: session.id.clone(),
        })
    }

    /// Persists a new session and returns the plaintext refresh token once.
    pub async fn issue(&self, user_id: &UserId, device_info: Option<String>) -> Result<(String, Session)> {
        let (refresh_token, draft) = self.draft(device_info);
        let session = draft.for_user(user_id.clone());
        self.sessions.create(&session).await?;
        Ok((refresh_token, session))
    }

    /// Issues a session and mints the access token that goes with it.
    pub async fn start(&self, user_id: &UserId, device_info: Option<String>, method: &str) -> Result<TokenPair> {
        let (refresh_token, session) = self.issue(user_id, device_info).await?;
        self.open(refresh_token, &session, method)
    }

    /// Mints the access token for a session that is already stored.
    pub fn open(&self, refresh_token: String, session: &Session, method: &str) -> Result<TokenPair> {
        let pair = self.token_pair(refresh_token, session)?;

        self.metrics.record_login(method);
        tracing::info!(user_id = %session.user_id, session_id = %session.id, %method, "session started");
        Ok(pair)
    }

    /// Exchanges a refresh token for a new pair. The presented token is
    /// revoked in the same transaction that inserts its successor, so a
    /// second presentation fails with `SessionRevoked`.
    pub async fn rotate(&self, presented: &str) -> Result<TokenPair> {
        let now = self.clock.now();
        let token_hash = hashing::hash_refresh_token(presented);

        let Some(current) = self.sessions.find_by_token_hash(&token_hash).await? else {
            self.metrics.record_refresh("not_found");
            return Err(AuthError::SessionNotFound);
        };
        if current.is_revoked() {
            return Err(self.reject_reuse(&current, now).await);
        }
        if current.is_expired(now) {
            self.metrics.record_refresh("expired");
            return Err(AuthError::SessionExpired);
        }

        let (refresh_token, draft) =
            self.draft_in_family(current.family_id.clone(), current.device_info.clone(), now);
        let replacement = draft.for_user(current.user_id.clone());

        if !self.sessions.rotate(&current.id, &replacement, now).await? {
            // Lost a race against another rotation or a revocation.
            return match self.sessions.find_by_id(&current.id).await? {
                Some(latest) if latest.is_revoked() => Err(self.reject_reuse(&latest, now).await),
                Some(_) => {
                    self.metrics.record_refresh("expired");
                    Err(AuthError::SessionExpired)
                }
                None => {
                    self.metrics.record_refresh("not_found");
                    Err(AuthError::SessionNotFound)
                }
            };
        }

        self.metrics.record_refresh("rotated");
        tracing::info!(
            user_id = %current.user_id,
            from = %current.id,
            to = %replacement.id,
            "session rotated"
        );
        self.token_pair(refresh_token, &replacement)
    }

    async fn reject_reuse(&self, session: &Session, now: DateTime<Utc>) -> AuthError {
        self.metrics.record_refresh("reused");
        tracing::warn!(
            user_id = %session.user_id,
            session_id = %session.id,
            "revoked refresh token presented"
        );

        if self.reuse_revokes_family {
            match self.sessions.revoke_family(&session.family_id, now).await {
                Ok(revoked) => tracing::warn!(
                    family_id = %session.family_id,
                    revoked,
                    "session family revoked after token reuse"
                ),
                Err(e) => return e,
            }
        }
        AuthError::SessionRevoked
    }

    /// Returns `false` if the session was already revoked or never existed.
    pub async fn revoke(&self, session_id: &str) -> Result<bool> {
        let revoked = self.sessions.revoke(session_id, self.clock.now()).await?;
        if revoked {
            tracing::info!(%session_id, "session revoked");
        }
        Ok(revoked)
    }

    /// Revokes one of the caller's own sessions. Sessions owned by someone
    /// else are reported as missing.
    pub async fn revoke_owned(&self, user_id: &UserId, session_id: &str) -> Result<()> {
        match self.sessions.find_by_id(session_id).await? {
            Some(session) if &session.user_id == user_id => {
                self.revoke(session_id).await?;
                Ok(())
            }
            _ => Err(AuthError::SessionNotFound),
        }
    }

    /// Logout: revokes whichever session the refresh token belongs to.
    /// Presenting an already-revoked token is not an error.
    pub async fn revoke_by_token(&self, refresh_token: &str) -> Result<()> {
        let token_hash = hashing::hash_refresh_token(refresh_token);
        let session = self
            .sessions
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(AuthError::SessionNotFound)?;
        self.revoke(&session.id).await?;
        Ok(())
    }

    pub async fn revoke_all(&self, user_id: &UserId) -> Result<u64> {
        let revoked = self
            .sessions
            .revoke_all_for_user(user_id, self.clock.now())
            .await?;
        tracing::info!(user_id = %user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    pub async fn list_active(&self, user_id: &UserId) -> Result<Vec<Session>> {
        self.sessions
            .list_active_for_user(user_id, self.clock.now())
            .await
    }
}
