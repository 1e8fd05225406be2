//! metacat API - credential issuance and session lifecycle over HTTP
//!
//! Registration, login, refresh-token rotation, logout, password changes,
//! API keys and user administration, documented with OpenAPI.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{http::HeaderValue, Router};
use metacat_core::ServerConfig;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::change_password_handler,
        handlers::auth::me_handler,
        handlers::api_keys::create_api_key_handler,
        handlers::api_keys::list_api_keys_handler,
        handlers::api_keys::revoke_api_key_handler,
        handlers::users::list_users_handler,
        handlers::users::create_user_handler,
        handlers::users::get_user_handler,
        handlers::users::update_user_handler,
        handlers::users::delete_user_handler,
    ),
    components(schemas(
        error::ApiError,
        handlers::MessageResponse,
        handlers::health::HealthResponse,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::RefreshRequest,
        auth::LogoutRequest,
        auth::ChangePasswordRequest,
        auth::CreateUserRequest,
        auth::UpdateUserRequest,
        auth::AuthResponse,
        auth::CreateApiKeyRequest,
        auth::CreatedApiKey,
        auth::StrengthReport,
        metacat_core::UserPublic,
        metacat_core::UserRole,
        metacat_core::UserStatus,
        metacat_core::ApiKeyPublic,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Sessions and credentials"),
        (name = "api-keys", description = "Long-lived API keys"),
        (name = "users", description = "User administration"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            );
        }
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.is_empty() || config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs.max(1));
    let cors = cors_layer(&state.config.server);

    Router::new()
        .merge(routes::api_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Application state over an in-memory store with fast password hashing
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_state() -> Arc<AppState> {
    use metacat_core::{AppConfig, MemorySessionStore, PasswordHashConfig};

    let mut config = AppConfig::default();
    config.auth.jwt_secret = "integration-test-secret-at-least-32-bytes-long".to_string();
    config.auth.password_hash = PasswordHashConfig::fast_insecure();

    let state = AppState::new(config, Arc::new(MemorySessionStore::new()))
        .expect("fast_insecure Argon2 parameters are valid");
    Arc::new(state)
}

/// Router over [`create_test_state`]
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(create_test_state())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;

        assert!(paths.contains_key("/auth/login"));
        assert!(paths.contains_key("/auth/refresh"));
        assert!(paths.contains_key("/auth/users/{id}"));
        assert!(paths.contains_key("/auth/api-keys/{id}"));

        let schemes = &doc.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("bearer_auth"));
        assert!(schemes.contains_key("api_key"));
    }

    fn router_with_origins(origins: &[&str]) -> Router {
        use metacat_core::{AppConfig, MemorySessionStore, PasswordHashConfig};

        let mut config = AppConfig::default();
        config.auth.jwt_secret = "integration-test-secret-at-least-32-bytes-long".to_string();
        config.auth.password_hash = PasswordHashConfig::fast_insecure();
        config.server.cors_origins = origins.iter().map(|o| o.to_string()).collect();

        let state = AppState::new(config, Arc::new(MemorySessionStore::new())).unwrap();
        create_router(Arc::new(state))
    }

    async fn preflight_allow_origin(app: Router, origin: &str) -> Option<String> {
        use axum::{body::Body, http::Request};
        use tower::ServiceExt;

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/health")
            .header("origin", origin)
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_cors_without_origins_allows_any() {
        let allowed = preflight_allow_origin(router_with_origins(&[]), "https://x.example").await;
        assert_eq!(allowed.as_deref(), Some("*"));
    }

    #[tokio::test]
    async fn test_cors_origin_list_is_enforced() {
        let app = router_with_origins(&["https://app.example.com", "\u{0}bad"]);

        let allowed = preflight_allow_origin(app.clone(), "https://app.example.com").await;
        assert_eq!(allowed.as_deref(), Some("https://app.example.com"));

        let denied = preflight_allow_origin(app, "https://evil.example").await;
        assert_eq!(denied, None);
    }
}
