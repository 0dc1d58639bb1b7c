pub mod clock;
pub mod hashing;
pub mod identity;
pub mod jwt;
pub mod mailer;
pub mod maintenance;
pub mod memory_store;
pub mod metrics;
pub mod oidc;
pub mod quota;
pub mod rate_limit;
pub mod security;
pub mod session;
pub mod verification;
