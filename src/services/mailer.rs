use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::config::environment::BrevoSettings;
use crate::modules::auth::interface::AuthError;

/// Delivers one-time codes. Called only after the code row is committed.
#[async_trait]
pub trait CodeMailer: Send + Sync {
    async fn send_code(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError>;
}

/// Development mailer: writes the code to the log at debug level.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl CodeMailer for LogMailer {
    async fn send_code(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        tracing::debug!(%email, %code, %expires_at, "verification code (log mailer)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendEmailBody {
    sender: BrevoEmailAddress,
    to: Vec<BrevoEmailAddress>,
    subject: String,
    text_content: String,
}

/// Transactional mail through the Brevo HTTP API.
pub struct BrevoMailer {
    client: Client,
    settings: BrevoSettings,
    base_url: String,
}

impl BrevoMailer {
    pub fn new(client: Client, settings: BrevoSettings) -> Self {
        Self {
            client,
            settings,
            base_url: "https://api.brevo.com".to_string(),
        }
    }
}

#[async_trait]
impl CodeMailer for BrevoMailer {
    async fn send_code(&self, email: &str, code: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        let minutes = (expires_at - Utc::now()).num_minutes().max(1);
        let body = BrevoSendEmailBody {
            sender: BrevoEmailAddress {
                email: self.settings.sender_email.clone(),
                name: self.settings.sender_name.clone(),
            },
            to: vec![BrevoEmailAddress {
                email: email.to_string(),
                name: None,
            }],
            subject: "Your sign-in code".to_string(),
            text_content: format!("Your sign-in code is {code}. It expires in {minutes} minutes."),
        };

        let response = self
            .client
            .post(format!("{}/v3/smtp/email", self.base_url))
            .header("api-key", &self.settings.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AuthError::Delivery(format!("Brevo send failed (status={status}): {text}")));
        }

        Ok(())
    }
}
