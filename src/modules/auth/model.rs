use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identifier of a local user. Travels through request handling as a typed
/// value rather than a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    #[default]
    Basic,
    Pro,
    Unlimited,
}

impl PolicyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Unlimited => "unlimited",
        }
    }
}

/// External identity providers accepted for federated sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Apple,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Apple => "apple",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "apple" => Ok(Self::Apple),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub policy_tier: PolicyTier,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A user created by a first successful email verification.
    pub fn with_verified_email(email: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::generate(),
            email: Some(email.to_string()),
            email_verified: true,
            display_name: None,
            policy_tier: PolicyTier::default(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A user created by a first federated sign-in. The provider email stays
    /// on the identity row; the account itself carries none.
    pub fn federated(display_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::generate(),
            email: None,
            email_verified: false,
            display_name,
            policy_tier: PolicyTier::default(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FederatedIdentity {
    pub id: String,
    pub user_id: UserId,
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FederatedIdentity {
    pub fn new(
        user_id: UserId,
        provider: Provider,
        subject: &str,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            provider: provider.as_str().to_string(),
            subject: subject.to_string(),
            email,
            created_at: now,
        }
    }
}

/// A renewable login. Only the SHA-256 of the refresh token is kept.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: UserId,
    /// Shared by every session rotated out of the same login.
    pub family_id: String,
    pub token_hash: String,
    pub device_info: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}

/// A session whose owner is not known yet. Email verification decides the
/// owner and inserts the session in the transaction that consumes the code.
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub id: String,
    pub family_id: String,
    pub token_hash: String,
    pub device_info: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionDraft {
    pub fn for_user(&self, user_id: UserId) -> Session {
        Session {
            id: self.id.clone(),
            user_id,
            family_id: self.family_id.clone(),
            token_hash: self.token_hash.clone(),
            device_info: self.device_info.clone(),
            expires_at: self.expires_at,
            revoked_at: None,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct VerificationCode {
    pub email: String,
    /// Changes on every issuance; lets the store report which write won.
    pub issue_id: String,
    pub code_hash: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Profile data offered by an identity provider alongside the subject id.
#[derive(Debug, Clone, Default)]
pub struct ProfileHints {
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
}
