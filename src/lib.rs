pub mod config;
pub mod modules;
pub mod services;

use axum::{http::StatusCode, middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use config::{AuthPolicy, DbPool, HttpSettings};
use modules::auth::auth_routes;
use modules::auth::crud::{IdentityCrud, SessionCrud, UserCrud, VerificationCrud};
use modules::auth::interface::{
    IdentityRepository, SessionRepository, UserRepository, VerificationCodeRepository,
};
use modules::metrics::metrics_routes;
use modules::quota::crud::UsageCrud;
use modules::quota::interface::UsageRepository;
use modules::quota::usage_routes;
use services::clock::Clock;
use services::hashing::CodeHasher;
use services::identity::IdentityService;
use services::jwt::JwtService;
use services::mailer::CodeMailer;
use services::memory_store::MemoryStore;
use services::metrics::{metrics_middleware, MetricsRegistry};
use services::oidc::AssertionVerifier;
use services::quota::QuotaService;
use services::rate_limit::{create_rate_limiter, RateLimitLayer};
use services::security::security_headers;
use services::session::SessionService;
use services::verification::VerificationService;

/// Storage handles, one per repository trait.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub identities: Arc<dyn IdentityRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub codes: Arc<dyn VerificationCodeRepository>,
    pub usage: Arc<dyn UsageRepository>,
}

impl Repositories {
    pub fn mysql(pool: DbPool) -> Self {
        Self {
            users: Arc::new(UserCrud::new(pool.clone())),
            identities: Arc::new(IdentityCrud::new(pool.clone())),
            sessions: Arc::new(SessionCrud::new(pool.clone())),
            codes: Arc::new(VerificationCrud::new(pool.clone())),
            usage: Arc::new(UsageCrud::new(pool)),
        }
    }

    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            users: Arc::new(store.clone()),
            identities: Arc::new(store.clone()),
            sessions: Arc::new(store.clone()),
            codes: Arc::new(store.clone()),
            usage: Arc::new(store.clone()),
        }
    }
}

/// Everything besides storage that the services are built from.
pub struct Collaborators {
    pub jwt: Arc<JwtService>,
    pub code_hasher: CodeHasher,
    pub mailer: Arc<dyn CodeMailer>,
    pub assertions: Arc<dyn AssertionVerifier>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsRegistry>,
}

pub struct AppState {
    pub jwt: Arc<JwtService>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: SessionService,
    pub verification: VerificationService,
    pub identities: IdentityService,
    pub quota: QuotaService,
    pub assertions: Arc<dyn AssertionVerifier>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsRegistry>,
    pub http: HttpSettings,
}

impl AppState {
    pub fn new(repos: Repositories, deps: Collaborators, policy: &AuthPolicy, http: HttpSettings) -> Self {
        let Collaborators {
            jwt,
            code_hasher,
            mailer,
            assertions,
            clock,
            metrics,
        } = deps;

        Self {
            sessions: SessionService::new(
                repos.sessions.clone(),
                jwt.clone(),
                clock.clone(),
                metrics.clone(),
                policy,
            ),
            verification: VerificationService::new(
                repos.codes.clone(),
                mailer,
                code_hasher,
                clock.clone(),
                metrics.clone(),
                policy.codes.clone(),
            ),
            identities: IdentityService::new(repos.identities.clone(), repos.users.clone(), clock.clone()),
            quota: QuotaService::new(
                repos.usage.clone(),
                repos.users.clone(),
                clock.clone(),
                metrics.clone(),
                policy.tiers.clone(),
            ),
            users: repos.users,
            jwt,
            assertions,
            clock,
            metrics,
            http,
        }
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let http = state.http.clone();
    let email_limit = RateLimitLayer::new(
        create_rate_limiter(http.email_route_burst),
        http.trust_forwarded_headers,
    );
    let metrics = state.metrics.clone();

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/auth", auth_routes(email_limit))
        .merge(usage_routes())
        .with_state(state)
        .merge(metrics_routes(metrics.clone()))
        .layer(middleware::from_fn_with_state(metrics, metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(RequestBodyLimitLayer::new(http.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, http.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn root() -> &'static str {
    "Catalog Identity API"
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
