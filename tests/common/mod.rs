use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;

use catalog_identity::config::{AuthPolicy, HttpSettings};
use catalog_identity::modules::auth::interface::AuthError;
use catalog_identity::modules::auth::model::{ProfileHints, Provider, User, UserId};
use catalog_identity::services::clock::{Clock, ManualClock};
use catalog_identity::services::hashing::CodeHasher;
use catalog_identity::services::jwt::{generate_ed25519_pem_pair, JwtService};
use catalog_identity::services::mailer::CodeMailer;
use catalog_identity::services::memory_store::MemoryStore;
use catalog_identity::services::metrics::MetricsRegistry;
use catalog_identity::services::oidc::{AssertionVerifier, VerifiedAssertion};
use catalog_identity::{create_app, AppState, Collaborators, Repositories};

lazy_static! {
    // Key generation is the slowest part of setup; one pair serves every test.
    static ref KEY_PAIR: (String, String) = generate_ed25519_pem_pair().expect("Failed to generate key pair");
}

pub const CODE_SECRET: &str = "test-code-secret-do-not-use";
pub const ISSUER: &str = "catalog-identity-test";

#[allow(dead_code)]
pub fn jwt_service() -> JwtService {
    let (private_pem, public_pem) = &*KEY_PAIR;
    JwtService::new(
        private_pem.as_bytes(),
        public_pem.as_bytes(),
        ISSUER,
        chrono::Duration::minutes(15),
        30,
    )
    .expect("Failed to load test key pair")
}

/// Keeps every code that would have been mailed.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl RecordingMailer {
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CodeMailer for RecordingMailer {
    async fn send_code(&self, email: &str, code: &str, _expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }
}

/// Accepts assertions written as `subject`, `subject|email` or
/// `subject|email|verified`. The literal `invalid` is rejected.
pub struct FakeVerifier;

#[async_trait]
impl AssertionVerifier for FakeVerifier {
    async fn verify(&self, _provider: Provider, assertion: &str) -> Result<VerifiedAssertion, AuthError> {
        if assertion == "invalid" || assertion.is_empty() {
            return Err(AuthError::InvalidAssertion("rejected by fake verifier".to_string()));
        }

        let mut parts = assertion.split('|');
        let subject = parts.next().unwrap_or_default().to_string();
        let email = parts.next().map(str::to_string);
        let email_verified = parts.next() == Some("verified");

        Ok(VerifiedAssertion {
            subject,
            hints: ProfileHints {
                email,
                email_verified,
                display_name: Some("Test User".to_string()),
            },
        })
    }
}

// Allow dead_code for utilities used by other test files
#[allow(dead_code)]
pub struct TestContext {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub mailer: Arc<RecordingMailer>,
    request_interval: Duration,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        Self::with_policy(AuthPolicy::default())
    }

    pub fn with_policy(policy: AuthPolicy) -> Self {
        Self::build(policy, HttpSettings::default())
    }

    pub fn build(policy: AuthPolicy, http: HttpSettings) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let mailer = Arc::new(RecordingMailer::default());

        let request_interval = policy.codes.request_interval;
        let state = Arc::new(AppState::new(
            Repositories::memory(&store),
            Collaborators {
                jwt: Arc::new(jwt_service()),
                code_hasher: CodeHasher::new(CODE_SECRET.as_bytes()).expect("Failed to build code hasher"),
                mailer: mailer.clone(),
                assertions: Arc::new(FakeVerifier),
                clock: clock.clone(),
                metrics: MetricsRegistry::new().expect("Failed to create metrics registry"),
            },
            &policy,
            http,
        ));

        let app = create_app(state.clone());
        let server = TestServer::new(app).expect("Failed to create test server");

        Self {
            server,
            state,
            store,
            clock,
            mailer,
            request_interval,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Moves the clock past the request interval when a code already went to `email`.
    pub fn wait_out_request_interval(&self, email: &str) {
        if self.mailer.last_code_for(email).is_some() {
            self.clock.advance(self.request_interval);
        }
    }

    /// Verifies `code` with a fresh session draft and returns (user, created).
    pub async fn verify(&self, email: &str, code: &str) -> Result<(User, bool), AuthError> {
        let (_, draft) = self.state.sessions.draft(None);
        let login = self.state.verification.verify(email, code, &draft).await?;
        Ok((login.user, login.created))
    }

    /// Creates a verified user through the code flow, bypassing HTTP.
    /// The login session it opens is left in place.
    pub async fn create_user(&self, email: &str) -> UserId {
        self.wait_out_request_interval(email);
        self.state.verification.request(email).await.expect("code request failed");
        let code = self.mailer.last_code_for(email).expect("code was not sent");
        let (user, _) = self.verify(email, &code).await.expect("code verification failed");
        user.id
    }

    /// Runs the email flow over HTTP and returns (access, refresh, user id).
    pub async fn sign_in_with_email(&self, email: &str) -> (String, String, String) {
        self.wait_out_request_interval(email);
        self.server
            .post("/auth/email/request")
            .json(&serde_json::json!({ "email": email }))
            .await
            .assert_status_ok();

        let code = self.mailer.last_code_for(email).expect("code was not sent");
        let response = self
            .server
            .post("/auth/email/verify")
            .json(&serde_json::json!({ "email": email, "code": code, "device_info": "test-device" }))
            .await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
            body["user_id"].as_str().unwrap().to_string(),
        )
    }
}

// Helper to generate unique test email
#[allow(dead_code)]
pub fn test_email() -> String {
    format!("test_{}@example.com", uuid::Uuid::new_v4())
}
