//! Authentication and authorization
//!
//! - `password`: strength policy and Argon2id hashing (`CredentialVerifier`)
//! - `jwt`: access token signing and refresh token issuance (`TokenService`)
//! - `service`: registration, login, refresh rotation, account administration
//! - `api_keys`: API key issuance and verification
//! - `middleware`: request gates (`AuthorizationGuard`)
//! - `retry`: timeout and single retry around every store call
//! - `housekeeping`: background pruning of expired refresh tokens

pub mod api_keys;
pub mod housekeeping;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod retry;
pub mod secret;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use api_keys::{has_scope, ApiKeyManager, CreateApiKeyRequest, CreatedApiKey};
pub use housekeeping::spawn_prune_task;
pub use jwt::{Claims, IssuedPair, TokenError, TokenPair, TokenService};
pub use middleware::{
    optional_authenticate, require_auth, require_owner_or_admin, require_role, require_scope,
    user_id_from_path, AuthMethod, AuthenticatedUser, AuthorizationGuard,
};
pub use password::{CredentialVerifier, StrengthReport};
pub use retry::StorePolicy;
pub use service::{
    AuthResponse, AuthService, ChangePasswordRequest, CreateUserRequest, LoginRequest,
    LogoutRequest, RefreshRequest, RegisterRequest, UpdateUserRequest,
};
