use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;
use crate::services::rate_limit::RateLimitLayer;
use super::controller;

pub fn auth_routes(email_limit: RateLimitLayer) -> Router<Arc<AppState>> {
    // Code endpoints send mail and accept guesses; they are limited per client.
    let email = Router::new()
        .route("/email/request", post(controller::request_code))
        .route("/email/resend", post(controller::resend_code))
        .route("/email/verify", post(controller::verify_code))
        .route_layer(email_limit);

    Router::new()
        .merge(email)
        .route("/federated/{provider}", post(controller::federated_sign_in))
        .route("/refresh", post(controller::refresh))
        .route("/logout", post(controller::logout))
        .route("/logout-all", post(controller::logout_all))
        .route(
            "/me",
            get(controller::me)
                .patch(controller::update_me)
                .delete(controller::delete_me),
        )
        .route("/sessions", get(controller::list_sessions))
        .route("/sessions/{id}", delete(controller::revoke_session))
        .route("/identities", get(controller::list_identities))
        .route("/identities/{provider}", post(controller::link_identity))
}
