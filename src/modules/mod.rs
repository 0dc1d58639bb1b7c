pub mod auth;
pub mod metrics;
pub mod quota;
