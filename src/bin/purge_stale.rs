//! Deletes expired or revoked sessions and spent codes. Meant for cron.

use std::sync::Arc;

use catalog_identity::config::{environment::Config, init_db};
use catalog_identity::modules::auth::crud::{SessionCrud, VerificationCrud};
use catalog_identity::services::{clock::SystemClock, maintenance::MaintenanceService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_identity=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Failed to load environment configuration");
    let db = init_db(
        &config.database_url,
        2,
        config.database_acquire_timeout,
    )
    .await
    .expect("Failed to connect to MySQL");

    let maintenance = MaintenanceService::new(
        Arc::new(SessionCrud::new(db.clone())),
        Arc::new(VerificationCrud::new(db)),
        Arc::new(SystemClock),
        config.purge_retention,
    );

    if let Err(e) = maintenance.purge_stale().await {
        tracing::error!(error = %e, "purge failed");
        std::process::exit(1);
    }
}
