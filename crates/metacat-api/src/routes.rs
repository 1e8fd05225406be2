//! API route definitions

use crate::auth::middleware::{
    optional_authenticate, require_auth, require_owner_or_admin, require_role, require_scope,
    user_id_from_path,
};
use crate::handlers::{api_keys, auth, health, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metacat_core::UserRole;
use std::sync::Arc;

/// Create the auth routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler));

    // Registration is public, but an authenticated admin may grant roles
    let register_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_authenticate,
        ));

    // Any authenticated caller
    let session_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/change-password", post(auth::change_password_handler))
        .route(
            "/auth/api-keys",
            get(api_keys::list_api_keys_handler).post(api_keys::create_api_key_handler),
        )
        .route("/auth/api-keys/:id", delete(api_keys::revoke_api_key_handler));

    let admin_read_routes = Router::new()
        .route("/auth/users", get(users::list_users_handler))
        .route_layer(middleware::from_fn(require_role(UserRole::Admin)))
        .route_layer(middleware::from_fn(require_scope("users:read")));

    let owner_read_routes = Router::new()
        .route("/auth/users/:id", get(users::get_user_handler))
        .route_layer(middleware::from_fn(require_owner_or_admin(user_id_from_path)))
        .route_layer(middleware::from_fn(require_scope("users:read")));

    let admin_write_routes = Router::new()
        .route("/auth/users", post(users::create_user_handler))
        .route(
            "/auth/users/:id",
            axum::routing::patch(users::update_user_handler).delete(users::delete_user_handler),
        )
        .route_layer(middleware::from_fn(require_role(UserRole::Admin)))
        .route_layer(middleware::from_fn(require_scope("users:write")));

    let protected_routes = Router::new()
        .merge(session_routes)
        .merge(admin_read_routes)
        .merge(owner_read_routes)
        .merge(admin_write_routes)
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .merge(public_routes)
        .merge(register_routes)
        .merge(protected_routes)
}
