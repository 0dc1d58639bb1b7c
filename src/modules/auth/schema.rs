use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::model::{FederatedIdentity, PolicyTier, Session, User};

// =============================================================================
// EMAIL CODE
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RequestCodeRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RequestCodeResponse {
    pub message: &'static str,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyCodeRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 4, max = 10, message = "Invalid code format"))]
    pub code: String,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub device_info: Option<String>,
}

// =============================================================================
// FEDERATED SIGN-IN
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct FederatedSignInRequest {
    #[validate(length(min = 1, message = "Missing identity token"))]
    pub id_token: String,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub device_info: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LinkIdentityRequest {
    #[validate(length(min = 1, message = "Missing identity token"))]
    pub id_token: String,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub provider: String,
    pub email: Option<String>,
    pub linked_at: DateTime<Utc>,
}

impl From<FederatedIdentity> for IdentityResponse {
    fn from(identity: FederatedIdentity) -> Self {
        Self {
            provider: identity.provider,
            email: identity.email,
            linked_at: identity.created_at,
        }
    }
}

// =============================================================================
// TOKENS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user_id: String,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    pub revoked: u64,
}

// =============================================================================
// ME (Current User)
// =============================================================================

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub policy_tier: PolicyTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email,
            email_verified: user.email_verified,
            display_name: user.display_name,
            policy_tier: user.policy_tier,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 120, message = "Display name too long"))]
    pub display_name: Option<String>,
}

// =============================================================================
// SESSIONS (Devices)
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub device_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            device_info: session.device_info,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            retry_at: None,
        }
    }

    pub fn with_message(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: Some(message.into()),
            retry_at: None,
        }
    }

    pub fn retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.retry_at = Some(at);
        self
    }
}
