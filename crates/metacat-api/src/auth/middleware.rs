/// Request authentication and authorization gates
///
/// `require_auth` resolves the caller from `Authorization: Bearer <token>` or
/// `X-API-Key` and stores an [`AuthenticatedUser`] in the request extensions.
/// The role, scope and ownership gates run after it and read that extension.
use super::api_keys::{has_scope, ApiKeyManager};
use super::jwt::TokenService;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use metacat_core::{AuthError, UserRole};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying a raw API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// How the caller proved its identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    AccessToken { jti: Uuid, family_id: Uuid },
    ApiKey { key_id: Uuid, scopes: Vec<String> },
}

/// Authenticated caller, available to handlers as `Extension<AuthenticatedUser>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub method: AuthMethod,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether the caller holds `required` or a higher role
    pub fn satisfies(&self, required: UserRole) -> bool {
        self.role >= required
    }

    /// Access tokens carry every scope; API keys only their own
    pub fn has_scope(&self, required: &str) -> bool {
        match &self.method {
            AuthMethod::AccessToken { .. } => true,
            AuthMethod::ApiKey { scopes, .. } => has_scope(scopes, required),
        }
    }

    /// Reject API-key identities for session-only operations
    pub fn require_session(&self) -> Result<(), AuthError> {
        match self.method {
            AuthMethod::AccessToken { .. } => Ok(()),
            AuthMethod::ApiKey { .. } => Err(AuthError::Authorization(
                "This operation requires an interactive session".to_string(),
            )),
        }
    }
}

/// Resolves credentials to identities and applies role/ownership policy
#[derive(Clone)]
pub struct AuthorizationGuard {
    tokens: Arc<TokenService>,
    api_keys: ApiKeyManager,
}

impl AuthorizationGuard {
    pub fn new(tokens: Arc<TokenService>, api_keys: ApiKeyManager) -> Self {
        Self { tokens, api_keys }
    }

    /// Resolve the caller, if any credential was presented
    ///
    /// A bearer token takes precedence over an API key. Invalid credentials
    /// fail with `Authentication` and are audited; the response never says
    /// which check failed.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<AuthenticatedUser>, AuthError> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty());
            let Some(token) = token else {
                return Err(reject(headers, "malformed authorization header"));
            };

            return match self.tokens.verify_access(token) {
                Ok(claims) => Ok(Some(AuthenticatedUser {
                    user_id: claims.sub,
                    username: claims.username,
                    email: claims.email,
                    role: claims.role,
                    method: AuthMethod::AccessToken {
                        jti: claims.jti,
                        family_id: claims.fam,
                    },
                })),
                Err(e) => Err(reject(headers, &e.to_string())),
            };
        }

        if let Some(value) = headers.get(API_KEY_HEADER) {
            let Ok(raw_key) = value.to_str() else {
                return Err(reject(headers, "malformed api key header"));
            };

            return match self.api_keys.verify(raw_key.trim()).await {
                Ok((key, owner)) => Ok(Some(AuthenticatedUser {
                    user_id: owner.id,
                    username: owner.username,
                    email: owner.email,
                    role: owner.role,
                    method: AuthMethod::ApiKey {
                        key_id: key.id,
                        scopes: key.scopes,
                    },
                })),
                Err(AuthError::Authentication) => Err(reject(headers, "invalid api key")),
                Err(other) => Err(other),
            };
        }

        Ok(None)
    }

    /// `role >= min`, or `Authorization`
    pub fn require_role(identity: &AuthenticatedUser, min: UserRole) -> Result<(), AuthError> {
        if identity.satisfies(min) {
            Ok(())
        } else {
            Err(AuthError::Authorization(format!("Requires {min} role")))
        }
    }

    /// Pass the resource owner or any administrator
    pub fn require_owner_or_admin(
        identity: &AuthenticatedUser,
        owner_id: Uuid,
    ) -> Result<(), AuthError> {
        if identity.user_id == owner_id || identity.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Authorization(
                "Only the owner or an administrator may access this resource".to_string(),
            ))
        }
    }
}

fn reject(headers: &HeaderMap, reason: &str) -> AuthError {
    audit_log(&AuditEvent::InvalidToken {
        reason: reason.to_string(),
        ip_address: extract_ip_address(headers),
        user_agent: extract_user_agent(headers),
    });
    AuthError::Authentication
}

fn deny(request: &Request<Body>, identity: &AuthenticatedUser, required: String) {
    audit_log(&AuditEvent::AccessDenied {
        user_id: Some(identity.user_id),
        resource: request.uri().path().to_string(),
        required: Some(required),
        ip_address: extract_ip_address(request.headers()),
    });
}

fn identity_of(request: &Request<Body>) -> Result<AuthenticatedUser, AppError> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or(AppError::Unauthorized)
}

/// Require a valid access token or API key
///
/// ```ignore
/// let app = Router::new()
///     .route("/auth/me", get(me))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
/// ```
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let identity = state
        .guard
        .authenticate(request.headers())
        .await?
        .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Attach the caller when valid credentials are present; never fails
pub async fn optional_authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match state.guard.authenticate(request.headers()).await {
        Ok(Some(identity)) => {
            request.extensions_mut().insert(identity);
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "Proceeding without identity"),
    }

    next.run(request).await
}

/// Future returned by the gate factories below
type GateFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory requiring `min` or a higher role
///
/// ```ignore
/// Router::new()
///     .route("/auth/users", get(list_users))
///     .route_layer(middleware::from_fn(require_role(UserRole::Admin)))
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub fn require_role(min: UserRole) -> impl Fn(Request<Body>, Next) -> GateFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let identity = identity_of(&request)?;
            if let Err(e) = AuthorizationGuard::require_role(&identity, min) {
                deny(&request, &identity, format!("role:{min}"));
                return Err(e.into());
            }
            Ok(next.run(request).await)
        })
    }
}

/// Middleware factory requiring an API-key scope; access tokens always pass
pub fn require_scope(scope: &'static str) -> impl Fn(Request<Body>, Next) -> GateFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let identity = identity_of(&request)?;
            if !identity.has_scope(scope) {
                deny(&request, &identity, format!("scope:{scope}"));
                return Err(AppError::Forbidden(format!("API key lacks scope {scope}")));
            }
            Ok(next.run(request).await)
        })
    }
}

/// Extracts the id of the user owning the requested resource
pub type OwnerExtractor = fn(&Request<Body>) -> Option<Uuid>;

/// Owner id taken from the last path segment, e.g. `/auth/users/{id}`
pub fn user_id_from_path(request: &Request<Body>) -> Option<Uuid> {
    request
        .uri()
        .path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| Uuid::try_parse(segment).ok())
}

/// Middleware factory passing the resource owner or an administrator
pub fn require_owner_or_admin(
    extract_owner: OwnerExtractor,
) -> impl Fn(Request<Body>, Next) -> GateFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let identity = identity_of(&request)?;
            let Some(owner_id) = extract_owner(&request) else {
                return Err(AppError::NotFound("Resource not found".to_string()));
            };
            if let Err(e) = AuthorizationGuard::require_owner_or_admin(&identity, owner_id) {
                deny(&request, &identity, "owner_or_admin".to_string());
                return Err(e.into());
            }
            Ok(next.run(request).await)
        })
    }
}
