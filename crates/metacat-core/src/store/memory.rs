//! In-memory session store

use super::state::SessionState;
use super::{RotateOutcome, SessionStore, StoreError};
use crate::models::{ApiKey, RefreshTokenRecord, User, UserFilter, UserUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local session store
///
/// Every operation completes inside a single lock guard without awaiting,
/// so a cancelled caller can never observe or leave a half-applied rotation.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    state: RwLock<SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.state.write().await.create_user(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.find_user_by_username(username))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.find_user_by_email(email))
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.find_user_by_id(id))
    }

    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<User, StoreError> {
        self.state.write().await.update_user(id, update, Utc::now())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.write().await.delete_user(id))
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        Ok(self.state.read().await.list_users(filter))
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.write().await.update_last_login(id, at)
    }

    async fn change_password_digest(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .change_password_digest(id, password_hash, at)
    }

    async fn save_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.state.write().await.save_refresh_token(record)
    }

    async fn find_refresh_token_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.state.read().await.find_refresh_token_by_id(id))
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        self.state
            .write()
            .await
            .rotate_refresh_token(old_id, replacement, now)
    }

    async fn revoke_refresh_token(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.state.write().await.revoke_refresh_token(id, now))
    }

    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .state
            .write()
            .await
            .revoke_refresh_token_family(family_id, now))
    }

    async fn revoke_all_refresh_tokens_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .state
            .write()
            .await
            .revoke_all_refresh_tokens_for_user(user_id, now))
    }

    async fn prune_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.state.write().await.prune_expired_refresh_tokens(now))
    }

    async fn save_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.state.write().await.save_api_key(key)
    }

    async fn find_api_key_by_digest(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.state.read().await.find_api_key_by_digest(key_hash))
    }

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.state.read().await.find_api_key_by_id(id))
    }

    async fn list_api_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self.state.read().await.list_api_keys_for_user(user_id))
    }

    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.state.write().await.revoke_api_key(id, now))
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.write().await.touch_api_key(id, at)
    }
}
