//! JSON file-backed session store
//!
//! The whole store is held in memory and mirrored to a single JSON snapshot.
//! A mutation is applied to a copy of the state, the copy is written to a
//! temporary file and renamed over the snapshot, and only then does the copy
//! replace the live state. A failed write leaves both disk and memory at the
//! previous version.
//!
//! File IO runs on the blocking pool. The write and the swap form one
//! detached commit task holding the state lock, so a caller that is dropped
//! mid-write cannot leave disk and memory at different versions.

use super::state::{SessionState, SNAPSHOT_VERSION};
use super::{RotateOutcome, SessionStore, StoreError};
use crate::models::{ApiKey, RefreshTokenRecord, User, UserFilter, UserUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Session store persisted as a JSON snapshot
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    state: Arc<Mutex<SessionState>>,
}

impl FileSessionStore {
    /// Open the snapshot at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state: SessionState = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Backend(format!("corrupt snapshot {}: {e}", path.display()))
                })?;
                if state.version > SNAPSHOT_VERSION {
                    return Err(StoreError::Backend(format!(
                        "snapshot {} has unsupported version {}",
                        path.display(),
                        state.version
                    )));
                }
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionState::default(),
            Err(e) => {
                return Err(StoreError::Backend(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::info!(
            path = %path.display(),
            users = state.users.len(),
            refresh_tokens = state.refresh_tokens.len(),
            api_keys = state.api_keys.len(),
            "Opened file session store"
        );

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-only closure against the current state
    async fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> T {
        let guard = self.state.lock().await;
        f(&guard)
    }

    /// Apply a mutation to a copy, persist it, then publish it
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.mutate_if(|s| f(s).map(|value| (value, true))).await
    }

    /// Like [`Self::mutate`], but only persists when `f` reports a change
    async fn mutate_if<T>(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.clone().lock_owned().await;
        let mut next = guard.clone();
        let (value, changed) = f(&mut next)?;
        if !changed {
            return Ok(value);
        }

        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| StoreError::Backend(format!("failed to encode snapshot: {e}")))?;
        let path = self.path.clone();

        let commit = tokio::spawn(async move {
            tokio::task::spawn_blocking(move || write_snapshot(&path, &bytes))
                .await
                .map_err(|e| StoreError::Backend(format!("snapshot writer failed: {e}")))??;
            *guard = next;
            Ok::<(), StoreError>(())
        });
        commit
            .await
            .map_err(|e| StoreError::Backend(format!("snapshot commit failed: {e}")))??;

        Ok(value)
    }
}

fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |e: std::io::Error| StoreError::Backend(format!("{}: {e}", path.display()));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.mutate(|s| s.create_user(user)).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read(|s| s.find_user_by_username(username)).await)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read(|s| s.find_user_by_email(email)).await)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.read(|s| s.find_user_by_id(id)).await)
    }

    async fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<User, StoreError> {
        self.mutate(|s| s.update_user(id, update, Utc::now())).await
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.delete_user(id))).await
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        Ok(self.read(|s| s.list_users(filter)).await)
    }

    async fn update_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|s| s.update_last_login(id, at)).await
    }

    async fn change_password_digest(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.mutate(|s| s.change_password_digest(id, password_hash, at))
            .await
    }

    async fn save_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.mutate(|s| s.save_refresh_token(record)).await
    }

    async fn find_refresh_token_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.read(|s| s.find_refresh_token_by_id(id)).await)
    }

    async fn rotate_refresh_token(
        &self,
        old_id: Uuid,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        self.mutate_if(|s| {
            let outcome = s.rotate_refresh_token(old_id, replacement, now)?;
            Ok((outcome, outcome == RotateOutcome::Rotated))
        })
        .await
    }

    async fn revoke_refresh_token(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.revoke_refresh_token(id, now))).await
    }

    async fn revoke_refresh_token_family(
        &self,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.mutate(|s| Ok(s.revoke_refresh_token_family(family_id, now)))
            .await
    }

    async fn revoke_all_refresh_tokens_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.mutate(|s| Ok(s.revoke_all_refresh_tokens_for_user(user_id, now)))
            .await
    }

    async fn prune_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.mutate(|s| Ok(s.prune_expired_refresh_tokens(now)))
            .await
    }

    async fn save_api_key(&self, key: &ApiKey) -> Result<(), StoreError> {
        self.mutate(|s| s.save_api_key(key)).await
    }

    async fn find_api_key_by_digest(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.read(|s| s.find_api_key_by_digest(key_hash)).await)
    }

    async fn find_api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.read(|s| s.find_api_key_by_id(id)).await)
    }

    async fn list_api_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self.read(|s| s.list_api_keys_for_user(user_id)).await)
    }

    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.revoke_api_key(id, now))).await
    }

    async fn touch_api_key(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|s| s.touch_api_key(id, at)).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::conformance;
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, FileSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("sessions.json"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_users() {
        let (_dir, store) = temp_store().await;
        conformance::users(&store).await;
    }

    #[tokio::test]
    async fn test_rotation() {
        let (_dir, store) = temp_store().await;
        conformance::rotation(&store).await;
    }

    #[tokio::test]
    async fn test_api_keys() {
        let (_dir, store) = temp_store().await;
        conformance::api_keys(&store).await;
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let alice = conformance::user("alice");
        let token = conformance::token_for(&alice);
        {
            let store = FileSessionStore::open(&path).await.unwrap();
            store.create_user(&alice).await.unwrap();
            store.save_refresh_token(&token).await.unwrap();
            store.revoke_refresh_token(token.id, Utc::now()).await.unwrap();
        }

        let reopened = FileSessionStore::open(&path).await.unwrap();
        let user = reopened.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.password_hash, alice.password_hash);
        let record = reopened
            .find_refresh_token_by_id(token.id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_revoked());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_disk_untouched() {
        let (_dir, store) = temp_store().await;
        let alice = conformance::user("alice");
        store.create_user(&alice).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        assert!(store.create_user(&alice).await.is_err());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_dropped_caller_keeps_disk_and_memory_in_step() {
        let (dir, store) = temp_store().await;
        store.create_user(&conformance::user("alice")).await.unwrap();

        for name in ["bob", "carol", "dave"] {
            let user = conformance::user(name);
            let _ = tokio::time::timeout(
                std::time::Duration::from_micros(1),
                store.create_user(&user),
            )
            .await;
        }

        // Waits behind any commit still in flight
        let in_memory = store.list_users(&UserFilter::default()).await.unwrap();
        let reopened = FileSessionStore::open(dir.path().join("sessions.json"))
            .await
            .unwrap();
        let on_disk = reopened.list_users(&UserFilter::default()).await.unwrap();

        let names = |users: &[User]| {
            let mut names: Vec<_> = users.iter().map(|u| u.username.clone()).collect();
            names.sort();
            names
        };
        assert_eq!(names(&in_memory), names(&on_disk));
        assert!(names(&on_disk).contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result = FileSessionStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
