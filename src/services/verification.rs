use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::config::CodePolicy;
use crate::modules::auth::interface::{
    AuthError, CodeIssued, EmailLogin, IssueOutcome, RedeemOutcome, Result, VerificationCodeRepository,
};
use crate::modules::auth::model::{SessionDraft, User, VerificationCode};
use crate::services::clock::Clock;
use crate::services::hashing::{self, CodeHasher};
use crate::services::mailer::CodeMailer;
use crate::services::metrics::MetricsRegistry;

/// Lowercases and trims; rejects anything that is not an address.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if !email.validate_email() {
        return Err(AuthError::InvalidEmail);
    }
    Ok(email)
}

/// Passwordless login: one-time numeric codes bound to an email address.
pub struct VerificationService {
    codes: Arc<dyn VerificationCodeRepository>,
    mailer: Arc<dyn CodeMailer>,
    hasher: CodeHasher,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    policy: CodePolicy,
}

impl VerificationService {
    pub fn new(
        codes: Arc<dyn VerificationCodeRepository>,
        mailer: Arc<dyn CodeMailer>,
        hasher: CodeHasher,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
        policy: CodePolicy,
    ) -> Self {
        Self {
            codes,
            mailer,
            hasher,
            clock,
            metrics,
            policy,
        }
    }

    /// Issues a code, replacing any previous one for the address. Refused
    /// within the request interval so a new code cannot be had on every
    /// call, which would also reset the attempt counter.
    pub async fn request(&self, email: &str) -> Result<CodeIssued> {
        self.issue(email, self.policy.request_interval).await
    }

    /// Like `request`, but refused until the resend interval has passed
    /// since the last issuance.
    pub async fn resend(&self, email: &str) -> Result<CodeIssued> {
        self.issue(email, self.policy.resend_interval).await
    }

    async fn issue(&self, email: &str, min_interval: Duration) -> Result<CodeIssued> {
        let email = normalize_email(email)?;
        let now = self.clock.now();
        let code = hashing::generate_numeric_code(self.policy.length);

        let row = VerificationCode {
            email: email.clone(),
            issue_id: Uuid::new_v4().to_string(),
            code_hash: self.hasher.hash(&email, &code),
            attempts: 0,
            expires_at: now + self.policy.ttl,
            consumed_at: None,
            created_at: now,
        };

        if let IssueOutcome::Throttled { retry_at } = self.codes.issue(&row, min_interval).await? {
            self.metrics.record_code("throttled");
            tracing::warn!(%email, %retry_at, "code issuance throttled");
            return Err(AuthError::ResendTooSoon { retry_at });
        }

        // The row is committed; a failed send leaves it redeemable and
        // `resend` available once the interval passes.
        if let Err(e) = self.mailer.send_code(&email, &code, row.expires_at).await {
            self.metrics.record_code("delivery_failed");
            return Err(e);
        }

        self.metrics.record_code("issued");
        tracing::info!(%email, "verification code issued");

        Ok(CodeIssued {
            email,
            expires_at: row.expires_at,
            resend_available_at: now + self.policy.resend_interval,
        })
    }

    /// Redeems a code. On success the user (created on first verification)
    /// and `session` are committed together with the code's consumption.
    pub async fn verify(&self, email: &str, code: &str, session: &SessionDraft) -> Result<EmailLogin> {
        let email = normalize_email(email)?;
        let code = code.trim();
        if !hashing::is_well_formed_code(code, self.policy.length) {
            self.metrics.record_code("rejected");
            return Err(AuthError::InvalidCode);
        }

        let now = self.clock.now();
        let new_user = User::with_verified_email(&email, now);
        let outcome = self
            .codes
            .redeem(
                &email,
                &self.hasher.hash(&email, code),
                self.policy.max_attempts,
                &new_user,
                session,
                now,
            )
            .await?;

        let (error, label) = match outcome {
            RedeemOutcome::Redeemed { user, created, session } => {
                self.metrics.record_code("redeemed");
                tracing::info!(user_id = %user.id, created, "verification code redeemed");
                return Ok(EmailLogin { user, created, session });
            }
            RedeemOutcome::NotFound | RedeemOutcome::Mismatch => (AuthError::InvalidCode, "rejected"),
            RedeemOutcome::Exhausted => (AuthError::TooManyAttempts, "exhausted"),
            RedeemOutcome::Expired => (AuthError::CodeExpired, "expired"),
            RedeemOutcome::AlreadyUsed => (AuthError::CodeAlreadyUsed, "already_used"),
        };

        self.metrics.record_code(label);
        tracing::warn!(%email, outcome = label, "verification code not accepted");
        Err(error)
    }
}
