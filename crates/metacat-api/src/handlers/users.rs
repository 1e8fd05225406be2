//! User administration handlers
//!
//! Mounted behind `require_role(Admin)`, except `GET /auth/users/{id}` which
//! also admits the account owner.

use super::MessageResponse;
use crate::auth::{AuthenticatedUser, CreateUserRequest, UpdateUserRequest};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use metacat_core::UserFilter;
use std::sync::Arc;
use uuid::Uuid;

/// List users
#[utoipa::path(
    get,
    path = "/auth/users",
    tag = "users",
    params(
        ("role" = Option<String>, Query, description = "viewer, editor or admin"),
        ("status" = Option<String>, Query, description = "active, suspended or disabled"),
        ("search" = Option<String>, Query, description = "Substring of username, email or display name"),
        ("limit" = Option<usize>, Query, description = "Page size (max 200)"),
        ("offset" = Option<usize>, Query, description = "Rows to skip"),
    ),
    responses(
        (status = 200, description = "Matching users", body = Vec<metacat_core::UserPublic>),
        (status = 403, description = "Administrator role required", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<UserFilter>,
) -> Result<impl IntoResponse, AppError> {
    let users = state.auth.list_users(filter).await?;
    Ok(Json(users))
}

/// Create a user with any role
#[utoipa::path(
    post,
    path = "/auth/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = metacat_core::UserPublic),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Username or email already exists", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
)]
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let user = state.auth.create_user(admin.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Get a user (owner or administrator)
#[utoipa::path(
    get,
    path = "/auth/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = metacat_core::UserPublic),
        (status = 403, description = "Neither owner nor administrator", body = crate::error::ApiError),
        (status = 404, description = "No such user", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.get_user(user_id).await?;
    Ok(Json(user))
}

/// Update a user's profile, role or status
///
/// Suspending or disabling an account ends all of its sessions.
#[utoipa::path(
    patch,
    path = "/auth/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = metacat_core::UserPublic),
        (status = 400, description = "Invalid update", body = crate::error::ApiError),
        (status = 404, description = "No such user", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
)]
pub async fn update_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let user = state.auth.update_user(admin.user_id, user_id, request).await?;
    Ok(Json(user))
}

/// Delete a user with its sessions and API keys
#[utoipa::path(
    delete,
    path = "/auth/users/{id}",
    tag = "users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 404, description = "No such user", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []), ("api_key" = []))
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.delete_user(admin.user_id, user_id).await?;
    Ok(Json(MessageResponse::new("User deleted")))
}
