use chrono::{Duration, Utc};
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::auth::interface::AuthError;
use crate::modules::auth::model::UserId;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String, // user id
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String, // unique token id
}

/// Mints and checks access tokens (JWS, EdDSA over Ed25519).
///
/// Validation only needs the public key and never touches storage. A
/// verifier-only instance, built with [`JwtService::verifier`], cannot mint.
pub struct JwtService {
    signer: Option<EncodingKey>,
    decoding_key: DecodingKey,
    issuer: String,
    access_token_duration: Duration,
    validation: Validation,
}

impl JwtService {
    pub fn new(
        private_key_pem: &[u8],
        public_key_pem: &[u8],
        issuer: impl Into<String>,
        access_token_duration: Duration,
        leeway_secs: u64,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let mut service = Self::verifier(public_key_pem, issuer, leeway_secs)?;
        service.signer = Some(EncodingKey::from_ed_pem(private_key_pem)?);
        service.access_token_duration = access_token_duration;
        Ok(service)
    }

    pub fn verifier(
        public_key_pem: &[u8],
        issuer: impl Into<String>,
        leeway_secs: u64,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = leeway_secs;
        validation.validate_aud = false;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Ok(Self {
            signer: None,
            decoding_key: DecodingKey::from_ed_pem(public_key_pem)?,
            issuer,
            access_token_duration: Duration::minutes(15),
            validation,
        })
    }

    pub fn mint_access(&self, user_id: &UserId, ttl: Duration) -> Result<String, AuthError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| AuthError::Internal("token signing key not loaded".to_string()))?;

        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::EdDSA), &claims, signer)
            .map_err(|e| AuthError::Internal(format!("failed to sign access token: {e}")))
    }

    /// Mints with the configured access-token lifetime.
    pub fn create_access_token(&self, user_id: &UserId) -> Result<String, AuthError> {
        self.mint_access(user_id, self.access_token_duration)
    }

    pub fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(UserId::from(data.claims.sub))
    }

    pub fn get_access_token_duration_secs(&self) -> i64 {
        self.access_token_duration.num_seconds()
    }
}

/// Fresh Ed25519 key pair as (PKCS#8 private PEM, SPKI public PEM).
pub fn generate_ed25519_pem_pair() -> Result<(String, String), String> {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);

    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| format!("failed to encode private key: {e}"))?;
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| format!("failed to encode public key: {e}"))?;

    Ok((private_pem.to_string(), public_pem))
}
