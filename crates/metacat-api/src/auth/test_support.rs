//! Shared fixtures for the auth unit tests

use super::retry::StorePolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metacat_core::{
    ApiKey, AuthConfig, MemorySessionStore, PasswordHashConfig, RefreshTokenRecord,
    RotateOutcome, SessionStore, StoreError, User, UserFilter, UserUpdate,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub(crate) fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "unit-test-secret-that-is-at-least-32-bytes".to_string(),
        password_hash: PasswordHashConfig::fast_insecure(),
        ..Default::default()
    }
}

pub(crate) fn test_policy() -> StorePolicy {
    StorePolicy {
        timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(1),
    }
}

/// Memory store that fails the next N calls with `Transient` and does not
/// support pruning
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemorySessionStore,
    failures_left: AtomicU32,
    revoke_all_failures_left: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next(&self, calls: u32) {
        self.failures_left.store(calls, Ordering::SeqCst);
    }

    /// Fail only the next N `revoke_all_refresh_tokens_for_user` calls
    pub(crate) fn fail_revoke_all(&self, calls: u32) {
        self.revoke_all_failures_left.store(calls, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        consume(&self.failures_left)
    }
}

fn consume(counter: &AtomicU32) -> Result<(), StoreError> {
    let consumed = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
        left.checked_sub(1)
    });
    match consumed {
        Ok(_) => Err(StoreError::Transient("injected failure".to_string())),
        Err(_) => Ok(()),
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.check()?;
        self.inner.create_user(user).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.check()?;
        self.inner.find_user_by_username(username).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.check()?;
        self.inner.find_user_by_email(email).await
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.check()?;
        self.inner.find_user_by_id(id).await
    }

    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<User, StoreError> {
        self.check()?;
        self.inner.update_user(id, update).await
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete_user(id).await
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        self.check()?;
        self.inner.list_users(filter).await
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_last_login(id, at).await
    }

    async fn change_password_digest(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.change_password_digest(id, password_hash, at).await
    }

    async fn save_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_refresh_token(record).await
    }

    async fn find_refresh_token_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.check()?;
        self.inner.find_refresh_token_by_id(id).await
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        self.check()?;
        self.inner.rotate_refresh_token(old_id, replacement, now).await
    }

    async fn revoke_refresh_token(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.revoke_refresh_token(id, now).await
    }

    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.revoke_refresh_token_family(family_id, now).await
    }

    async fn revoke_all_refresh_tokens_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check()?;
        consume(&self.revoke_all_failures_left)?;
        self.inner.revoke_all_refresh_tokens_for_user(user_id, now).await
    }

    async fn save_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_api_key(key).await
    }

    async fn find_api_key_by_digest(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        self.check()?;
        self.inner.find_api_key_by_digest(key_hash).await
    }

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        self.check()?;
        self.inner.find_api_key_by_id(id).await
    }

    async fn list_api_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        self.check()?;
        self.inner.list_api_keys_for_user(user_id).await
    }

    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.revoke_api_key(id, now).await
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.touch_api_key(id, at).await
    }
}
