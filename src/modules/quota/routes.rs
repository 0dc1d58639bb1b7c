use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;
use super::controller;

pub fn usage_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/usage", get(controller::usage_status))
        .route("/usage/consume", post(controller::consume))
}
