use std::env;
use std::str::FromStr;

use chrono::Duration;

use crate::modules::auth::model::PolicyTier;

/// Environment configuration
/// Loads and validates environment variables
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: std::time::Duration,
    pub bind_addr: String,
    pub jwt_private_key_pem: String,
    pub jwt_public_key_pem: String,
    pub jwt_issuer: String,
    pub jwt_leeway_secs: u64,
    pub code_hash_secret: String,
    pub google_client_ids: Vec<String>,
    pub apple_client_ids: Vec<String>,
    pub brevo: Option<BrevoSettings>,
    /// How long dead sessions and codes are kept before the sweep drops them.
    pub purge_retention: Duration,
    pub auth: AuthPolicy,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct BrevoSettings {
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
}

/// Lifetimes, limits and throttles for the identity services.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Presenting an already-rotated refresh token revokes every session
    /// descended from the same login.
    pub reuse_revokes_family: bool,
    pub codes: CodePolicy,
    pub tiers: TierPolicies,
}

#[derive(Debug, Clone)]
pub struct CodePolicy {
    pub length: usize,
    pub ttl: Duration,
    /// Minimum spacing between two `request` issuances for one address.
    pub request_interval: Duration,
    pub resend_interval: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct TierPolicies {
    pub basic: TierPolicy,
    pub pro: TierPolicy,
}

impl TierPolicies {
    /// `None` means the tier is not metered.
    pub fn for_tier(&self, tier: PolicyTier) -> Option<TierPolicy> {
        match tier {
            PolicyTier::Basic => Some(self.basic),
            PolicyTier::Pro => Some(self.pro),
            PolicyTier::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub request_timeout: std::time::Duration,
    pub email_route_burst: u32,
    pub max_body_bytes: usize,
    /// Key rate limits on `X-Forwarded-For` / `X-Real-IP`. Only safe when a
    /// proxy in front of the service overwrites those headers.
    pub trust_forwarded_headers: bool,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            length: 6,
            ttl: Duration::minutes(10),
            request_interval: Duration::seconds(30),
            resend_interval: Duration::seconds(60),
            max_attempts: 5,
        }
    }
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            basic: TierPolicy {
                limit: 5,
                window: Duration::days(1),
            },
            pro: TierPolicy {
                limit: 100,
                window: Duration::days(1),
            },
        }
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(60),
            reuse_revokes_family: false,
            codes: CodePolicy::default(),
            tiers: TierPolicies::default(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: std::time::Duration::from_secs(15),
            email_route_burst: 10,
            max_body_bytes: 1024 * 16,
            trust_forwarded_headers: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so it can be
    /// exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| format!("{key} must be set"));

        let database_url = require("DATABASE_URL")?;
        let database_max_connections = parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let database_acquire_timeout =
            std::time::Duration::from_secs(parse_or(&get, "DATABASE_ACQUIRE_TIMEOUT_SECS", 5u64)?);
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());

        let jwt_private_key_pem = key_material(&get, "JWT_PRIVATE_KEY")?;
        let jwt_public_key_pem = key_material(&get, "JWT_PUBLIC_KEY")?;
        let jwt_issuer = get("JWT_ISSUER").unwrap_or_else(|| "catalog-identity".to_string());
        let jwt_leeway_secs = parse_or(&get, "JWT_LEEWAY_SECS", 30u64)?;

        let code_hash_secret = require("CODE_HASH_SECRET")?;
        if code_hash_secret.len() < 16 {
            return Err("CODE_HASH_SECRET must be at least 16 characters".to_string());
        }

        let defaults = AuthPolicy::default();
        let codes = CodePolicy {
            length: parse_or(&get, "CODE_LENGTH", defaults.codes.length)?,
            ttl: Duration::seconds(bounded(&get, "CODE_TTL_SECS", 600, MAX_SECS)?),
            request_interval: Duration::seconds(bounded(&get, "CODE_REQUEST_INTERVAL_SECS", 30, MAX_SECS)?),
            resend_interval: Duration::seconds(bounded(&get, "CODE_RESEND_INTERVAL_SECS", 60, MAX_SECS)?),
            max_attempts: parse_or(&get, "CODE_MAX_ATTEMPTS", defaults.codes.max_attempts)?,
        };
        if !(4..=10).contains(&codes.length) {
            return Err("CODE_LENGTH must be between 4 and 10".to_string());
        }

        let tiers = TierPolicies {
            basic: tier_policy(&get, "BASIC", defaults.tiers.basic)?,
            pro: tier_policy(&get, "PRO", defaults.tiers.pro)?,
        };

        let auth = AuthPolicy {
            access_token_ttl: Duration::seconds(bounded(&get, "ACCESS_TOKEN_TTL_SECS", 900, MAX_SECS)?),
            refresh_token_ttl: Duration::days(bounded(&get, "REFRESH_TOKEN_TTL_DAYS", 60, MAX_DAYS)?),
            reuse_revokes_family: parse_or(&get, "REFRESH_REUSE_REVOKES_FAMILY", false)?,
            codes,
            tiers,
        };

        let http_defaults = HttpSettings::default();
        let http = HttpSettings {
            request_timeout: std::time::Duration::from_secs(bounded(&get, "REQUEST_TIMEOUT_SECS", 15, 600)? as u64),
            email_route_burst: parse_or(&get, "EMAIL_ROUTE_BURST", http_defaults.email_route_burst)?,
            max_body_bytes: http_defaults.max_body_bytes,
            trust_forwarded_headers: parse_or(&get, "TRUST_FORWARDED_HEADERS", false)?,
        };
        if http.email_route_burst == 0 {
            return Err("EMAIL_ROUTE_BURST must be positive".to_string());
        }

        let brevo = match (get("BREVO_API_KEY"), get("BREVO_SENDER_EMAIL")) {
            (Some(api_key), Some(sender_email)) => Some(BrevoSettings {
                api_key,
                sender_email,
                sender_name: get("BREVO_SENDER_NAME"),
            }),
            _ => None,
        };

        let purge_retention = Duration::days(bounded(&get, "PURGE_RETENTION_DAYS", 7, MAX_DAYS)?);

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout,
            bind_addr,
            jwt_private_key_pem,
            jwt_public_key_pem,
            jwt_issuer,
            jwt_leeway_secs,
            code_hash_secret,
            google_client_ids: csv(get("GOOGLE_CLIENT_IDS")),
            apple_client_ids: csv(get("APPLE_CLIENT_IDS")),
            brevo,
            purge_retention,
            auth,
            http,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

/// Upper bound for second-valued lifetimes and windows (ten years).
const MAX_SECS: i64 = 10 * 365 * 24 * 60 * 60;
const MAX_DAYS: i64 = 10 * 365;

/// A whole number in `1..=max`, so every duration built from it is positive
/// and far from chrono's range limits.
fn bounded<G>(get: &G, key: &str, default: i64, max: i64) -> Result<i64, String>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value <= 0 {
        return Err(format!("{key} must be positive"));
    }
    if value > max {
        return Err(format!("{key} must be at most {max}"));
    }
    Ok(value)
}

fn tier_policy<G>(get: &G, tier: &str, default: TierPolicy) -> Result<TierPolicy, String>
where
    G: Fn(&str) -> Option<String>,
{
    let limit_key = format!("QUOTA_{tier}_LIMIT");
    let window_key = format!("QUOTA_{tier}_WINDOW_SECS");

    let limit = parse_or(get, &limit_key, default.limit)?;
    let window_secs = bounded(get, &window_key, default.window.num_seconds(), MAX_SECS)?;

    if limit == 0 {
        return Err(format!("{limit_key} must be positive"));
    }

    Ok(TierPolicy {
        limit,
        window: Duration::seconds(window_secs),
    })
}

/// PEM material either inline (`KEY`, with `\n` escapes allowed) or from `KEY_PATH`.
fn key_material<G>(get: &G, key: &str) -> Result<String, String>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(inline) = get(key) {
        return Ok(inline.replace("\\n", "\n"));
    }
    let path_key = format!("{key}_PATH");
    let path = get(&path_key).ok_or_else(|| format!("{key} or {path_key} must be set"))?;
    std::fs::read_to_string(&path).map_err(|e| format!("Failed to read {path_key} ({path}): {e}"))
}

fn csv(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
