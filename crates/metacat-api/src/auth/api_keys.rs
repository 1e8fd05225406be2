//! API key issuance and verification
//!
//! Raw keys look like `mck_<43 base64url chars>` and are returned exactly
//! once, at creation. Only their SHA-256 digest and a short display prefix
//! are stored.

use super::retry::StorePolicy;
use super::secret::{digest_secret, generate_secret};
use super::service::validation_reasons;
use crate::audit::{audit_log, AuditEvent};
use chrono::{Duration, Utc};
use metacat_core::{ApiKey, ApiKeyPublic, AuthError, SessionStore, User, UserRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Marker prefix of every raw API key
pub const API_KEY_PREFIX: &str = "mck_";

/// Characters of the raw key kept for display
const DISPLAY_PREFIX_LEN: usize = 12;

/// Active keys a single user may hold
pub const MAX_ACTIVE_KEYS_PER_USER: usize = 25;

/// API key creation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Key name must be 1-100 characters long"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description must be at most 500 characters long"))]
    pub description: Option<String>,
    /// Capabilities such as `metrics:read`, `users:*` or `*`
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Lifetime in days; keys without one never expire
    #[validate(range(min = 1, max = 3650, message = "Expiry must be between 1 and 3650 days"))]
    pub expires_in_days: Option<i64>,
}

/// A freshly created key; `key` is never retrievable again
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedApiKey {
    pub key: String,
    pub api_key: ApiKeyPublic,
}

/// Check whether `scopes` grant `required`
///
/// `*` grants everything, `resource:*` grants every action on `resource`.
pub fn has_scope(scopes: &[String], required: &str) -> bool {
    if scopes.iter().any(|s| s == "*" || s == required) {
        return true;
    }

    match required.split_once(':') {
        Some((resource, _)) => {
            let wildcard = format!("{resource}:*");
            scopes.iter().any(|s| *s == wildcard)
        }
        None => false,
    }
}

fn scope_is_well_formed(scope: &str) -> bool {
    let part_ok = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    };

    if scope == "*" {
        return true;
    }
    match scope.split_once(':') {
        Some((resource, action)) => part_ok(resource) && (action == "*" || part_ok(action)),
        None => false,
    }
}

/// Creates, verifies, lists and revokes API keys
#[derive(Clone)]
pub struct ApiKeyManager {
    store: Arc<dyn SessionStore>,
    policy: StorePolicy,
}

impl ApiKeyManager {
    pub fn new(store: Arc<dyn SessionStore>, policy: StorePolicy) -> Self {
        Self { store, policy }
    }

    /// Create a key for `user_id`
    pub async fn create(
        &self,
        user_id: Uuid,
        request: CreateApiKeyRequest,
    ) -> Result<CreatedApiKey, AuthError> {
        let mut reasons = request
            .validate()
            .err()
            .map(|e| validation_reasons(&e))
            .unwrap_or_default();
        for scope in request.scopes.iter().filter(|s| !scope_is_well_formed(s)) {
            reasons.push(format!("Invalid scope '{scope}': expected resource:action"));
        }
        if !reasons.is_empty() {
            return Err(AuthError::Validation(reasons));
        }

        let now = Utc::now();
        let existing = self
            .policy
            .call("list_api_keys_for_user", || {
                self.store.list_api_keys_for_user(user_id)
            })
            .await?;
        if existing.iter().filter(|k| k.is_usable_at(now)).count() >= MAX_ACTIVE_KEYS_PER_USER {
            return Err(AuthError::validation(format!(
                "At most {MAX_ACTIVE_KEYS_PER_USER} active API keys are allowed"
            )));
        }

        let raw_key = format!("{API_KEY_PREFIX}{}", generate_secret());
        let mut scopes = request.scopes;
        scopes.sort();
        scopes.dedup();

        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            name: request.name.trim().to_string(),
            description: request.description,
            key_hash: digest_secret(&raw_key),
            prefix: raw_key.chars().take(DISPLAY_PREFIX_LEN).collect(),
            scopes,
            created_at: now,
            expires_at: request.expires_in_days.map(|days| now + Duration::days(days)),
            last_used_at: None,
            revoked_at: None,
        };

        self.policy
            .call("save_api_key", || self.store.save_api_key(&key))
            .await?;

        audit_log(&AuditEvent::ApiKeyCreated {
            user_id,
            key_id: key.id,
            prefix: key.prefix.clone(),
        });

        Ok(CreatedApiKey {
            key: raw_key,
            api_key: key.to_public(),
        })
    }

    /// Resolve a raw key to the key record and its active owner
    ///
    /// The last-used timestamp is updated in the background.
    pub async fn verify(&self, raw_key: &str) -> Result<(ApiKey, User), AuthError> {
        if !raw_key.starts_with(API_KEY_PREFIX) {
            return Err(AuthError::Authentication);
        }

        let digest = digest_secret(raw_key);
        let key = self
            .policy
            .call("find_api_key_by_digest", || {
                self.store.find_api_key_by_digest(&digest)
            })
            .await?
            .ok_or(AuthError::Authentication)?;

        let now = Utc::now();
        if !key.is_usable_at(now) {
            debug!(key_id = %key.id, "Revoked or expired API key presented");
            return Err(AuthError::Authentication);
        }

        let owner = self
            .policy
            .call("find_user_by_id", || self.store.find_user_by_id(key.user_id))
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::Authentication)?;

        let store = Arc::clone(&self.store);
        let key_id = key.id;
        tokio::spawn(async move {
            if let Err(e) = store.touch_api_key(key_id, now).await {
                warn!(key_id = %key_id, error = %e, "Failed to record API key use");
            }
        });

        Ok((key, owner))
    }

    /// Revoke a key; only its owner or an administrator may do so
    pub async fn revoke(
        &self,
        key_id: Uuid,
        requester_id: Uuid,
        requester_role: UserRole,
    ) -> Result<(), AuthError> {
        let key = self
            .policy
            .call("find_api_key_by_id", || self.store.find_api_key_by_id(key_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("API key not found".to_string()))?;

        if key.user_id != requester_id && requester_role < UserRole::Admin {
            return Err(AuthError::Authorization(
                "Only the owner or an administrator may revoke this key".to_string(),
            ));
        }

        let now = Utc::now();
        let changed = self
            .policy
            .call("revoke_api_key", || self.store.revoke_api_key(key.id, now))
            .await?;

        if changed {
            audit_log(&AuditEvent::ApiKeyRevoked {
                key_id: key.id,
                owner_id: key.user_id,
                revoked_by: requester_id,
            });
        }

        Ok(())
    }

    /// List a user's keys, revoked ones included
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ApiKeyPublic>, AuthError> {
        let keys = self
            .policy
            .call("list_api_keys_for_user", || {
                self.store.list_api_keys_for_user(user_id)
            })
            .await?;
        Ok(keys.iter().map(ApiKey::to_public).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::test_policy;
    use metacat_core::{MemorySessionStore, UserStatus, UserUpdate};

    async fn setup() -> (Arc<MemorySessionStore>, ApiKeyManager, User) {
        let store = Arc::new(MemorySessionStore::new());
        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "digest".to_string(),
            "Alice".to_string(),
            UserRole::Editor,
        );
        store.create_user(&user).await.unwrap();
        let manager = ApiKeyManager::new(store.clone(), test_policy());
        (store, manager, user)
    }

    fn request(scopes: &[&str]) -> CreateApiKeyRequest {
        CreateApiKeyRequest {
            name: "ci".to_string(),
            description: Some("pipeline".to_string()),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            expires_in_days: None,
        }
    }

    #[test]
    fn test_has_scope() {
        let scopes = vec!["metrics:read".to_string(), "users:*".to_string()];

        assert!(has_scope(&scopes, "metrics:read"));
        assert!(has_scope(&scopes, "users:write"));
        assert!(!has_scope(&scopes, "metrics:write"));
        assert!(!has_scope(&scopes, "metrics"));
        assert!(has_scope(&["*".to_string()], "anything:at_all"));
        assert!(!has_scope(&[], "metrics:read"));
    }

    #[test]
    fn test_scope_format() {
        assert!(scope_is_well_formed("metrics:read"));
        assert!(scope_is_well_formed("users:*"));
        assert!(scope_is_well_formed("*"));
        assert!(!scope_is_well_formed("metrics"));
        assert!(!scope_is_well_formed("Metrics:Read"));
        assert!(!scope_is_well_formed(":read"));
        assert!(!scope_is_well_formed("*:read"));
    }

    #[tokio::test]
    async fn test_create_and_verify() {
        let (_, manager, user) = setup().await;
        let created = manager
            .create(user.id, request(&["metrics:read", "metrics:read"]))
            .await
            .unwrap();

        assert!(created.key.starts_with("mck_"));
        assert_eq!(created.api_key.prefix.len(), 12);
        assert!(created.key.starts_with(&created.api_key.prefix));
        assert_eq!(created.api_key.scopes, vec!["metrics:read".to_string()]);

        let (key, owner) = manager.verify(&created.key).await.unwrap();
        assert_eq!(key.id, created.api_key.id);
        assert_eq!(owner.id, user.id);
        assert_ne!(key.key_hash, created.key);
    }

    #[tokio::test]
    async fn test_verify_rejects_unknown_and_malformed() {
        let (_, manager, _) = setup().await;
        assert_eq!(
            manager.verify("not-a-key").await.unwrap_err(),
            AuthError::Authentication
        );
        assert_eq!(
            manager.verify("mck_unknown").await.unwrap_err(),
            AuthError::Authentication
        );
    }

    #[tokio::test]
    async fn test_revoked_key_fails_verify() {
        let (_, manager, user) = setup().await;
        let created = manager.create(user.id, request(&[])).await.unwrap();

        manager
            .revoke(created.api_key.id, user.id, user.role)
            .await
            .unwrap();
        assert_eq!(
            manager.verify(&created.key).await.unwrap_err(),
            AuthError::Authentication
        );
        // Revoking twice is harmless
        manager
            .revoke(created.api_key.id, user.id, user.role)
            .await
            .unwrap();

        let listed = manager.list(user.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].revoked);
    }

    #[tokio::test]
    async fn test_revoke_requires_owner_or_admin() {
        let (_, manager, user) = setup().await;
        let created = manager.create(user.id, request(&[])).await.unwrap();
        let stranger = Uuid::new_v4();

        assert!(matches!(
            manager
                .revoke(created.api_key.id, stranger, UserRole::Editor)
                .await,
            Err(AuthError::Authorization(_))
        ));
        assert!(matches!(
            manager
                .revoke(Uuid::new_v4(), user.id, user.role)
                .await,
            Err(AuthError::NotFound(_))
        ));
        manager
            .revoke(created.api_key.id, stranger, UserRole::Admin)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_inactive_owner_fails_verify() {
        let (store, manager, user) = setup().await;
        let created = manager.create(user.id, request(&[])).await.unwrap();

        store
            .update_user(
                user.id,
                &UserUpdate {
                    status: Some(UserStatus::Disabled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            manager.verify(&created.key).await.unwrap_err(),
            AuthError::Authentication
        );
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (_, manager, user) = setup().await;
        let bad = CreateApiKeyRequest {
            name: String::new(),
            description: None,
            scopes: vec!["bogus".to_string()],
            expires_in_days: Some(0),
        };

        match manager.create(user.id, bad).await {
            Err(AuthError::Validation(reasons)) => assert_eq!(reasons.len(), 3),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expiring_key() {
        let (_, manager, user) = setup().await;
        let created = manager
            .create(
                user.id,
                CreateApiKeyRequest {
                    expires_in_days: Some(30),
                    ..request(&["*"])
                },
            )
            .await
            .unwrap();

        let expires_at = created.api_key.expires_at.unwrap();
        assert!(expires_at > Utc::now() + Duration::days(29));
        assert!(manager.verify(&created.key).await.is_ok());
    }
}
