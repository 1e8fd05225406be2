//! API key handlers

use super::MessageResponse;
use crate::auth::{AuthenticatedUser, CreateApiKeyRequest};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Create an API key
///
/// The raw key is only ever returned in this response.
#[utoipa::path(
    post,
    path = "/auth/api-keys",
    tag = "api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "API key created", body = crate::auth::CreatedApiKey),
        (status = 400, description = "Invalid name, scope or expiry", body = crate::error::ApiError),
        (status = 403, description = "API keys cannot create API keys", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_api_key_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateApiKeyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    user.require_session()?;
    let Json(request) = payload?;
    let created = state.api_keys.create(user.user_id, request).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// List the caller's API keys
#[utoipa::path(
    get,
    path = "/auth/api-keys",
    tag = "api-keys",
    responses(
        (status = 200, description = "Caller's keys, without secrets", body = Vec<metacat_core::ApiKeyPublic>),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_api_keys_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    user.require_session()?;
    let keys = state.api_keys.list(user.user_id).await?;
    Ok(Json(keys))
}

/// Revoke an API key (owner or administrator)
#[utoipa::path(
    delete,
    path = "/auth/api-keys/{id}",
    tag = "api-keys",
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 200, description = "API key revoked", body = MessageResponse),
        (status = 403, description = "Not the owner", body = crate::error::ApiError),
        (status = 404, description = "No such key", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn revoke_api_key_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.api_keys.revoke(key_id, user.user_id, user.role).await?;
    Ok(Json(MessageResponse::new("API key revoked")))
}
