//! metacat Core - Domain models, storage traits, and shared types
//!
//! This crate defines the core abstractions used by the metacat services:
//! - Account and credential models (users, refresh tokens, API keys)
//! - The `SessionStore` trait and its storage adapters
//! - The authentication error taxonomy
//! - Configuration management

pub mod config;
pub mod models;
pub mod store;

pub use config::{
    AppConfig, AuthConfig, ConfigError, LoggingConfig, PasswordHashConfig, PasswordPolicy,
    ServerConfig, StoreBackend, StoreConfig, MAX_ACCESS_TOKEN_TTL_SECS,
    MAX_REFRESH_TOKEN_TTL_DAYS,
};
pub use models::{
    ApiKey, ApiKeyPublic, RefreshTokenRecord, RefreshTokenState, User, UserFilter,
    UserPublic, UserRole, UserStatus, UserUpdate,
};
pub use store::{
    open_store, FileSessionStore, MemorySessionStore, PgSessionStore, RotateOutcome,
    SessionStore, StoreError,
};

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Error taxonomy shared by every credential and session operation
///
/// Each variant maps onto exactly one HTTP status at the API edge. The
/// `Authentication` variant deliberately carries no reason: callers log the
/// cause where it happens and surface only the coarse category.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Authentication failed")]
    Authentication,

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service temporarily unavailable: {0}")]
    Transient(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Build a validation error from a single message
    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(vec![message.into()])
    }

    /// Stable machine-readable code for this error category
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Authentication => "UNAUTHORIZED",
            AuthError::Authorization(_) => "FORBIDDEN",
            AuthError::Conflict(_) => "CONFLICT",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::Transient(_) => "SERVICE_UNAVAILABLE",
            AuthError::Unsupported(_) => "UNSUPPORTED",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            StoreError::NotFound(msg) => AuthError::NotFound(msg),
            StoreError::Transient(msg) => AuthError::Transient(msg),
            StoreError::Unsupported(op) => AuthError::Unsupported(op),
            StoreError::Backend(msg) => AuthError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert_eq!(
            AuthError::from(StoreError::Conflict("username".to_string())),
            AuthError::Conflict("username".to_string())
        );
        assert_eq!(
            AuthError::from(StoreError::Transient("pool timed out".to_string())),
            AuthError::Transient("pool timed out".to_string())
        );
        assert!(matches!(
            AuthError::from(StoreError::Backend("syntax".to_string())),
            AuthError::Internal(_)
        ));
    }

    #[test]
    fn test_validation_display_lists_every_reason() {
        let err = AuthError::Validation(vec!["too short".to_string(), "no digit".to_string()]);
        assert_eq!(err.to_string(), "Validation failed: too short; no digit");
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
