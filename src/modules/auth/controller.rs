use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::modules::auth::{
    extractor::AuthUser,
    interface::{AuthError, CodeIssued, TokenPair},
    model::Provider,
    schema::{
        FederatedSignInRequest, IdentityResponse, LinkIdentityRequest, LogoutRequest, MessageResponse,
        RefreshTokenRequest, RefreshTokenResponse, RequestCodeRequest, RequestCodeResponse, RevokeAllResponse,
        SessionResponse, TokenResponse, UpdateProfileRequest, UserResponse, VerifyCodeRequest,
    },
};

fn validate<T: Validate>(req: &T) -> Result<(), AuthError> {
    req.validate().map_err(|e| {
        if e.field_errors().contains_key("email") {
            AuthError::InvalidEmail
        } else {
            AuthError::InvalidRequest(e.to_string())
        }
    })
}

fn parse_provider(raw: &str) -> Result<Provider, AuthError> {
    raw.parse::<Provider>().map_err(AuthError::InvalidRequest)
}

fn token_response(pair: TokenPair, user_id: String, created: bool) -> TokenResponse {
    TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer",
        expires_in: pair.expires_in,
        user_id,
        created,
    }
}

fn code_response(issued: CodeIssued) -> RequestCodeResponse {
    RequestCodeResponse {
        message: "Verification code sent",
        expires_at: issued.expires_at,
        resend_available_at: issued.resend_available_at,
    }
}

// =============================================================================
// POST /auth/email/request, /auth/email/resend
// =============================================================================

pub async fn request_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestCodeRequest>,
) -> Result<Json<RequestCodeResponse>, AuthError> {
    validate(&req)?;
    let issued = state.verification.request(&req.email).await?;
    Ok(Json(code_response(issued)))
}

pub async fn resend_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestCodeRequest>,
) -> Result<Json<RequestCodeResponse>, AuthError> {
    validate(&req)?;
    let issued = state.verification.resend(&req.email).await?;
    Ok(Json(code_response(issued)))
}

// =============================================================================
// POST /auth/email/verify
// =============================================================================

pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    validate(&req)?;
    let (refresh_token, draft) = state.sessions.draft(req.device_info);
    let login = state.verification.verify(&req.email, &req.code, &draft).await?;
    let pair = state.sessions.open(refresh_token, &login.session, "email")?;
    Ok(Json(token_response(pair, login.user.id.to_string(), login.created)))
}

// =============================================================================
// POST /auth/federated/{provider}
// =============================================================================

pub async fn federated_sign_in(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Json(req): Json<FederatedSignInRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    validate(&req)?;
    let provider = parse_provider(&provider)?;

    let assertion = state.assertions.verify(provider, &req.id_token).await?;
    let (user, created) = state
        .identities
        .sign_in(provider, &assertion.subject, assertion.hints)
        .await?;
    let pair = state
        .sessions
        .start(&user.id, req.device_info, provider.as_str())
        .await?;

    Ok(Json(token_response(pair, user.id.to_string(), created)))
}

// =============================================================================
// POST /auth/refresh, /auth/logout, /auth/logout-all
// =============================================================================

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, AuthError> {
    let pair = state.sessions.rotate(&req.refresh_token).await?;
    Ok(Json(RefreshTokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer",
        expires_in: pair.expires_in,
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.sessions.revoke_by_token(&req.refresh_token).await?;
    Ok(Json(MessageResponse { message: "Logged out" }))
}

pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<RevokeAllResponse>, AuthError> {
    let revoked = state.sessions.revoke_all(&auth.user_id).await?;
    Ok(Json(RevokeAllResponse { revoked }))
}

// =============================================================================
// GET/PATCH/DELETE /auth/me
// =============================================================================

pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = state
        .users
        .find_by_id(&auth.user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(user.into()))
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, AuthError> {
    validate(&req)?;
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    state
        .users
        .update_display_name(&auth.user_id, display_name, state.clock.now())
        .await?;

    me(State(state), auth).await
}

pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<StatusCode, AuthError> {
    if !state.users.soft_delete(&auth.user_id, state.clock.now()).await? {
        return Err(AuthError::UserNotFound);
    }
    tracing::info!(user_id = %auth.user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GET /auth/sessions, DELETE /auth/sessions/{id}
// =============================================================================

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<SessionResponse>>, AuthError> {
    let sessions = state.sessions.list_active(&auth.user_id).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    state.sessions.revoke_owned(&auth.user_id, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GET /auth/identities, POST /auth/identities/{provider}
// =============================================================================

pub async fn list_identities(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<IdentityResponse>>, AuthError> {
    let identities = state.identities.list(&auth.user_id).await?;
    Ok(Json(identities.into_iter().map(Into::into).collect()))
}

pub async fn link_identity(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(provider): Path<String>,
    Json(req): Json<LinkIdentityRequest>,
) -> Result<(StatusCode, Json<IdentityResponse>), AuthError> {
    validate(&req)?;
    let provider = parse_provider(&provider)?;

    let assertion = state.assertions.verify(provider, &req.id_token).await?;
    let identity = state
        .identities
        .link(&auth.user_id, provider, &assertion.subject, assertion.hints)
        .await?;

    Ok((StatusCode::CREATED, Json(identity.into())))
}
