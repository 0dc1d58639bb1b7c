use axum::{extract::State, Json};
use std::sync::Arc;

use crate::AppState;
use crate::modules::auth::{extractor::AuthUser, interface::AuthError};
use super::schema::{ConsumeResponse, QuotaStatusResponse};

// =============================================================================
// GET /usage - Current usage of the metered feature
// =============================================================================

pub async fn usage_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<QuotaStatusResponse>, AuthError> {
    let status = state.quota.status(&auth.user_id).await?;
    Ok(Json(status.into()))
}

// =============================================================================
// POST /usage/consume - Count one use before calling the search backend
// =============================================================================

pub async fn consume(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ConsumeResponse>, AuthError> {
    let status = state.quota.consume(&auth.user_id).await?;
    Ok(Json(ConsumeResponse {
        allowed: true,
        status: status.into(),
    }))
}
