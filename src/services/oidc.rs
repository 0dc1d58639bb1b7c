use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::modules::auth::interface::AuthError;
use crate::modules::auth::model::{ProfileHints, Provider};

const JWKS_TTL: Duration = Duration::from_secs(60 * 60);
const ASSERTION_LEEWAY_SECS: u64 = 60;

/// What this subsystem keeps from a provider assertion.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub subject: String,
    pub hints: ProfileHints,
}

/// Turns an opaque provider assertion into a stable subject id.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify(&self, provider: Provider, assertion: &str) -> Result<VerifiedAssertion, AuthError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub issuers: Vec<String>,
    pub jwks_url: String,
    pub audiences: Vec<String>,
}

impl ProviderSettings {
    pub fn google(client_ids: Vec<String>) -> Self {
        Self {
            issuers: vec![
                "https://accounts.google.com".to_string(),
                "accounts.google.com".to_string(),
            ],
            jwks_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
            audiences: client_ids,
        }
    }

    pub fn apple(client_ids: Vec<String>) -> Self {
        Self {
            issuers: vec!["https://appleid.apple.com".to_string()],
            jwks_url: "https://appleid.apple.com/auth/keys".to_string(),
            audiences: client_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    // Google sends a bool, Apple a string.
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// OpenID Connect ID-token verifier with a per-provider JWKS cache.
pub struct OidcVerifier {
    client: Client,
    providers: HashMap<Provider, ProviderSettings>,
    cache: RwLock<HashMap<Provider, CachedKeys>>,
}

impl OidcVerifier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            providers: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Providers without audiences stay disabled.
    pub fn with_provider(mut self, provider: Provider, settings: ProviderSettings) -> Self {
        if !settings.audiences.is_empty() {
            self.providers.insert(provider, settings);
        }
        self
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.providers.contains_key(&provider)
    }

    async fn keys(
        &self,
        provider: Provider,
        settings: &ProviderSettings,
        force_refresh: bool,
    ) -> Result<Arc<JwkSet>, AuthError> {
        if !force_refresh {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&provider) {
                if cached.fetched_at.elapsed() < JWKS_TTL {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let response = self
            .client
            .get(&settings.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("failed to fetch {provider} keys: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Internal(format!(
                "{provider} key endpoint returned status: {}",
                response.status()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("failed to parse {provider} keys: {e}")))?;
        let keys = Arc::new(keys);

        tracing::debug!(%provider, count = keys.keys.len(), "refreshed provider signing keys");

        self.cache.write().await.insert(
            provider,
            CachedKeys {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }
}

#[async_trait]
impl AssertionVerifier for OidcVerifier {
    async fn verify(&self, provider: Provider, assertion: &str) -> Result<VerifiedAssertion, AuthError> {
        let settings = self
            .providers
            .get(&provider)
            .ok_or(AuthError::ProviderNotConfigured(provider))?;

        let header = decode_header(assertion).map_err(|e| AuthError::InvalidAssertion(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidAssertion(format!("unexpected algorithm {:?}", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidAssertion("missing key id".to_string()))?;

        // Providers rotate keys; an unknown kid triggers one refetch.
        let mut keys = self.keys(provider, settings, false).await?;
        if keys.find(&kid).is_none() {
            keys = self.keys(provider, settings, true).await?;
        }
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| AuthError::InvalidAssertion(format!("unknown key id {kid}")))?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidAssertion(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = ASSERTION_LEEWAY_SECS;
        validation.set_audience(settings.audiences.as_slice());
        validation.set_issuer(settings.issuers.as_slice());

        let claims = decode::<IdTokenClaims>(assertion, &key, &validation)
            .map_err(|e| AuthError::InvalidAssertion(e.to_string()))?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidAssertion("empty subject".to_string()));
        }

        Ok(VerifiedAssertion {
            subject: claims.sub,
            hints: ProfileHints {
                email: claims.email.map(|e| e.trim().to_lowercase()),
                email_verified: is_verified_flag(claims.email_verified.as_ref()),
                display_name: claims.name,
            },
        })
    }
}

fn is_verified_flag(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
