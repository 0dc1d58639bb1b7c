use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use catalog_identity::config::{database::run_migrations, environment::Config, init_db};
use catalog_identity::modules::auth::model::Provider;
use catalog_identity::services::{
    clock::SystemClock,
    hashing::CodeHasher,
    jwt::JwtService,
    mailer::{BrevoMailer, CodeMailer, LogMailer},
    metrics::MetricsRegistry,
    oidc::{OidcVerifier, ProviderSettings},
};
use catalog_identity::{create_app, AppState, Collaborators, Repositories};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_identity=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load environment configuration");

    let db = init_db(
        &config.database_url,
        config.database_max_connections,
        config.database_acquire_timeout,
    )
    .await
    .expect("Failed to connect to MySQL");
    run_migrations(&db).await.expect("Failed to run migrations");
    tracing::info!("Connected to MySQL");

    let jwt = JwtService::new(
        config.jwt_private_key_pem.as_bytes(),
        config.jwt_public_key_pem.as_bytes(),
        config.jwt_issuer.clone(),
        config.auth.access_token_ttl,
        config.jwt_leeway_secs,
    )
    .expect("Failed to load JWT key pair");

    let code_hasher =
        CodeHasher::new(config.code_hash_secret.as_bytes()).expect("Failed to initialise code hasher");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client");

    let mailer: Arc<dyn CodeMailer> = match config.brevo.clone() {
        Some(settings) => Arc::new(BrevoMailer::new(http_client.clone(), settings)),
        None => {
            tracing::warn!("BREVO_API_KEY not set, verification codes go to the log");
            Arc::new(LogMailer)
        }
    };

    let verifier = OidcVerifier::new(http_client)
        .with_provider(Provider::Google, ProviderSettings::google(config.google_client_ids.clone()))
        .with_provider(Provider::Apple, ProviderSettings::apple(config.apple_client_ids.clone()));
    for provider in [Provider::Google, Provider::Apple] {
        if !verifier.is_enabled(provider) {
            tracing::info!(%provider, "federated provider disabled (no client ids)");
        }
    }

    let metrics = MetricsRegistry::new().expect("Failed to create metrics registry");

    let state = AppState::new(
        Repositories::mysql(db),
        Collaborators {
            jwt: Arc::new(jwt),
            code_hasher,
            mailer,
            assertions: Arc::new(verifier),
            clock: Arc::new(SystemClock),
            metrics,
        },
        &config.auth,
        config.http.clone(),
    );

    let app = create_app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
    tracing::info!("Server running on http://{}", config.bind_addr);
    // Peer addresses key the per-client rate limits.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap();
}
