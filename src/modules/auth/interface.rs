use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};

use super::model::{
    FederatedIdentity, PolicyTier, Provider, Session, SessionDraft, User, UserId, VerificationCode,
};
use super::schema::ErrorResponse;

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

pub type Result<T> = std::result::Result<T, AuthError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Live users only; soft-deleted rows are invisible.
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_display_name(&self, id: &UserId, display_name: Option<&str>, now: DateTime<Utc>) -> Result<()>;
    async fn set_policy_tier(&self, id: &UserId, tier: PolicyTier, now: DateTime<Utc>) -> Result<()>;
    /// Marks the user deleted, clears its email, drops its federated identities
    /// and usage period, and revokes its sessions, all in one transaction.
    /// Returns `false` if the user was already gone.
    async fn soft_delete(&self, id: &UserId, now: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_owner(&self, provider: Provider, subject: &str) -> Result<Option<User>>;
    /// Inserts both rows in one transaction. A duplicate (provider, subject)
    /// fails with `AuthError::IdentityAlreadyLinked` and leaves no user behind.
    async fn create_user_with_identity(&self, user: &User, identity: &FederatedIdentity) -> Result<()>;
    /// Attaches an identity to an existing user; same duplicate contract.
    async fn link(&self, identity: &FederatedIdentity) -> Result<()>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FederatedIdentity>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Session>>;
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;
    /// Revokes `current_id` and inserts `replacement` atomically. Returns
    /// `false` without writing anything if `current_id` is no longer live.
    async fn rotate(&self, current_id: &str, replacement: &Session, now: DateTime<Utc>) -> Result<bool>;
    async fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn revoke_all_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<u64>;
    async fn revoke_family(&self, family_id: &str, now: DateTime<Utc>) -> Result<u64>;
    async fn list_active_for_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<Session>>;
    /// Drops rows that expired or were revoked before `before`.
    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    /// Replaces whatever code the email holds, unless the previous one was
    /// issued less than `min_interval` ago. One atomic statement.
    async fn issue(&self, code: &VerificationCode, min_interval: Duration) -> Result<IssueOutcome>;
    /// Checks and consumes the email's code; on success finds or creates the
    /// user (`new_user` is inserted if no live user holds the email) and
    /// inserts `session` for that user, all inside the same transaction.
    async fn redeem(
        &self,
        email: &str,
        code_hash: &str,
        max_attempts: u32,
        new_user: &User,
        session: &SessionDraft,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome>;
    async fn delete_stale(&self, before: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// STORE OUTCOMES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Issued,
    Throttled { retry_at: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    Redeemed {
        user: User,
        created: bool,
        session: Session,
    },
    NotFound,
    Mismatch,
    Exhausted,
    Expired,
    AlreadyUsed,
}

// =============================================================================
// SERVICE RESULT TYPES
// =============================================================================

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub session_id: String,
}

/// A redeemed code together with the session stored in the same transaction.
#[derive(Debug, Clone)]
pub struct EmailLogin {
    pub user: User,
    pub created: bool,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct CodeIssued {
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code expired")]
    CodeExpired,

    #[error("Verification code already used")]
    CodeAlreadyUsed,

    #[error("Too many attempts; request a new code")]
    TooManyAttempts,

    #[error("A code was sent recently; retry after {retry_at}")]
    ResendTooSoon { retry_at: DateTime<Utc> },

    #[error("Quota exceeded until {resets_at}")]
    QuotaExceeded { resets_at: DateTime<Utc> },

    #[error("Too many requests")]
    RateLimited,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid identity assertion: {0}")]
    InvalidAssertion(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(Provider),

    #[error("Identity already linked to another account")]
    IdentityAlreadyLinked,

    #[error("User not found")]
    UserNotFound,

    #[error("Email delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::ExpiredToken => StatusCode::UNAUTHORIZED,
            Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::SessionRevoked => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound => StatusCode::UNAUTHORIZED,
            Self::InvalidCode => StatusCode::BAD_REQUEST,
            Self::CodeExpired => StatusCode::GONE,
            Self::CodeAlreadyUsed => StatusCode::CONFLICT,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::ResendTooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidEmail => StatusCode::BAD_REQUEST,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidAssertion(_) => StatusCode::UNAUTHORIZED,
            Self::ProviderNotConfigured(_) => StatusCode::NOT_FOUND,
            Self::IdentityAlreadyLinked => StatusCode::CONFLICT,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::SessionExpired => "session_expired",
            Self::SessionRevoked => "session_revoked",
            Self::SessionNotFound => "session_not_found",
            Self::InvalidCode => "invalid_code",
            Self::CodeExpired => "code_expired",
            Self::CodeAlreadyUsed => "code_already_used",
            Self::TooManyAttempts => "too_many_attempts",
            Self::ResendTooSoon { .. } => "resend_too_soon",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RateLimited => "rate_limited",
            Self::InvalidEmail => "invalid_email",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidAssertion(_) => "invalid_assertion",
            Self::ProviderNotConfigured(_) => "provider_not_configured",
            Self::IdentityAlreadyLinked => "identity_already_linked",
            Self::UserNotFound => "user_not_found",
            Self::Delivery(_) => "delivery_failed",
            Self::Database(_) => "internal_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "storage failure");
                ErrorResponse::new(self.code())
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                ErrorResponse::new(self.code())
            }
            Self::Delivery(e) => {
                tracing::error!(error = %e, "code delivery failure");
                ErrorResponse::new(self.code())
            }
            Self::ResendTooSoon { retry_at } => {
                ErrorResponse::with_message(self.code(), self.to_string()).retry_at(*retry_at)
            }
            Self::QuotaExceeded { resets_at } => {
                ErrorResponse::with_message(self.code(), self.to_string()).retry_at(*resets_at)
            }
            _ => ErrorResponse::with_message(self.code(), self.to_string()),
        };

        (status, Json(body)).into_response()
    }
}
