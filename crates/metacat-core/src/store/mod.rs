//! Session storage
//!
//! `SessionStore` is the single durable owner of users, refresh-token
//! records and API keys. Every adapter implements the full trait; an adapter
//! that cannot perform an operation returns [`StoreError::Unsupported`]
//! instead of being probed at runtime.
//!
//! Adapters:
//! - [`MemorySessionStore`]: process-local, for tests and single-node development
//! - [`FileSessionStore`]: JSON snapshot on disk
//! - [`PgSessionStore`]: PostgreSQL via sqlx

mod file;
mod memory;
mod postgres;
mod state;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::models::{ApiKey, RefreshTokenRecord, User, UserFilter, UserUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique field (username, email, key digest) already exists
    #[error("Duplicate value: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// The backend is temporarily unreachable; the call may be retried
    #[error("Store unavailable: {0}")]
    Transient(String),

    #[error("Operation not supported by this store: {0}")]
    Unsupported(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Result of the atomic compare-and-revoke performed during rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented record was active; it is now revoked and the replacement persisted
    Rotated,
    /// The presented record was missing, already revoked, or expired; nothing changed
    Stale,
}

/// Durable record of users, refresh-token digests, and API keys
#[async_trait]
pub trait SessionStore: Send + Sync {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a user; fails with `Conflict` on a duplicate username or email
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    /// Find a user by username (case-insensitive)
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Find a user by email (case-insensitive)
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Apply a partial update; fails with `NotFound` or `Conflict` (email taken)
    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<User, StoreError>;

    /// Hard-delete a user together with its refresh tokens and API keys
    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError>;

    /// List users matching a filter, newest first
    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError>;

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn change_password_digest(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Refresh tokens
    // ------------------------------------------------------------------

    async fn save_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_refresh_token_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Atomically revoke `old_id` (only if still active at `now`) and persist
    /// `replacement`. Concurrent calls on the same `old_id` yield at most one
    /// `Rotated`; a `Stale` outcome leaves the store untouched.
    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError>;

    /// Revoke a single record; returns `true` only if it was not already revoked
    async fn revoke_refresh_token(&self, id: Uuid, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Revoke every unrevoked record in a token family, returning the count
    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Revoke every unrevoked record of a user, returning the count
    async fn revoke_all_refresh_tokens_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete records that expired before `now`, returning the count
    async fn prune_expired_refresh_tokens(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Err(StoreError::Unsupported(
            "prune_expired_refresh_tokens".to_string(),
        ))
    }

    // ------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------

    async fn save_api_key(&self, key: &ApiKey) -> Result<(), StoreError>;

    async fn find_api_key_by_digest(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError>;

    async fn list_api_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError>;

    /// Revoke a key; returns `true` only if it was not already revoked
    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Record that a key was used
    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Open the adapter selected by `config.backend`
///
/// The PostgreSQL schema is applied on open.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn SessionStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory session store; sessions are lost on restart");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        StoreBackend::File => Ok(Arc::new(FileSessionStore::open(&config.file_path).await?)),
        StoreBackend::Postgres => {
            let store = PgSessionStore::connect(
                &config.postgres_url,
                config.postgres_pool_size,
                config.timeout(),
            )
            .await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_and_file_stores() {
        let memory = open_store(&StoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(memory.list_users(&UserFilter::default()).await.unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let file = open_store(&StoreConfig {
            backend: StoreBackend::File,
            file_path: dir.path().join("sessions.json"),
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(file.find_user_by_username("nobody").await.unwrap().is_none());
    }
}
