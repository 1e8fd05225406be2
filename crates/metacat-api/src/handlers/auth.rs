//! Authentication API handlers
//!
//! Registration, login, token refresh, logout, password change and the
//! caller's own profile.

use super::MessageResponse;
use crate::auth::{
    AuthenticatedUser, ChangePasswordRequest, LoginRequest, LogoutRequest, RefreshRequest,
    RegisterRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Register a new user account
///
/// New accounts get the viewer role. An administrator calling with a bearer
/// token may request a higher role.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = crate::auth::AuthResponse),
        (status = 400, description = "Invalid input or weak password", body = crate::error::ApiError),
        (status = 403, description = "Elevated role requested without administrator", body = crate::error::ApiError),
        (status = 409, description = "Username or email already exists", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    caller: Option<Extension<AuthenticatedUser>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let caller_role = caller.map(|Extension(user)| user.role);
    let response = state.auth.register(request, caller_role).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with username or email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = crate::auth::AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 403, description = "Account suspended or disabled", body = crate::error::ApiError),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let response = state.auth.login(request).await?;

    Ok(Json(response))
}

/// Exchange a refresh token for a new token pair
///
/// The presented refresh token is revoked. Presenting it again fails and,
/// depending on configuration, ends every session derived from the same login.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = crate::auth::AuthResponse),
        (status = 401, description = "Invalid, expired or reused refresh token", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let response = state.auth.refresh(&request.refresh_token).await?;

    Ok(Json(response))
}

/// Logout
///
/// Always succeeds for an authenticated caller; revocation problems are only
/// logged.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    request_body(content = LogoutRequest, description = "Logout options (optional)"),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    user.require_session()?;
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    state.auth.logout(user.user_id, &request).await;

    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Change the caller's password
///
/// Every refresh token of the account is revoked.
#[utoipa::path(
    post,
    path = "/auth/change-password",
    tag = "auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, all sessions ended", body = MessageResponse),
        (status = 400, description = "Weak new password", body = crate::error::ApiError),
        (status = 401, description = "Wrong current password", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    user.require_session()?;
    let Json(request) = payload?;
    state.auth.change_password(user.user_id, &request).await?;

    Ok(Json(MessageResponse::new(
        "Password changed; please log in again on other devices",
    )))
}

/// Get the caller's profile
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = metacat_core::UserPublic),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.auth.get_user(user.user_id).await?;
    Ok(Json(profile))
}
