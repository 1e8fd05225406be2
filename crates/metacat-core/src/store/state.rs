//! In-process session state shared by the memory and file adapters
//!
//! Every method is synchronous so that an adapter can run it entirely inside
//! one lock guard, which is what makes rotation atomic for these backends.

use super::{RotateOutcome, StoreError};
use crate::models::{ApiKey, RefreshTokenRecord, User, UserFilter, UserUpdate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionState {
    #[serde(default = "snapshot_version")]
    pub version: u32,
    #[serde(default)]
    pub users: BTreeMap<Uuid, User>,
    #[serde(default)]
    pub refresh_tokens: BTreeMap<Uuid, RefreshTokenRecord>,
    #[serde(default)]
    pub api_keys: BTreeMap<Uuid, ApiKey>,
}

fn snapshot_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            users: BTreeMap::new(),
            refresh_tokens: BTreeMap::new(),
            api_keys: BTreeMap::new(),
        }
    }
}

impl SessionState {
    fn username_taken(&self, username: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| Some(u.id) != except && u.username.eq_ignore_ascii_case(username))
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
    }

    pub fn create_user(&mut self, user: &User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Conflict("user id".to_string()));
        }
        if self.username_taken(&user.username, None) {
            return Err(StoreError::Conflict("username".to_string()));
        }
        if self.email_taken(&user.email, None) {
            return Err(StoreError::Conflict("email".to_string()));
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    pub fn find_user_by_username(&self, username: &str) -> Option<User> {
        self.users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned()
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    pub fn find_user_by_id(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).cloned()
    }

    pub fn update_user(
        &mut self,
        id: Uuid,
        update: &UserUpdate,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        if let Some(email) = &update.email {
            if self.email_taken(email, Some(id)) {
                return Err(StoreError::Conflict("email".to_string()));
            }
        }
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        update.apply(user, now);
        Ok(user.clone())
    }

    pub fn delete_user(&mut self, id: Uuid) -> bool {
        let removed = self.users.remove(&id).is_some();
        if removed {
            self.refresh_tokens.retain(|_, t| t.user_id != id);
            self.api_keys.retain(|_, k| k.user_id != id);
        }
        removed
    }

    pub fn list_users(&self, filter: &UserFilter) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        users
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect()
    }

    pub fn update_last_login(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.last_login = Some(at);
        user.updated_at = at;
        Ok(())
    }

    pub fn change_password_digest(
        &mut self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.password_hash = password_hash.to_string();
        user.password_changed_at = at;
        user.updated_at = at;
        Ok(())
    }

    pub fn save_refresh_token(&mut self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        if self.refresh_tokens.contains_key(&record.id) {
            return Err(StoreError::Conflict("refresh token id".to_string()));
        }
        self.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    pub fn find_refresh_token_by_id(&self, id: Uuid) -> Option<RefreshTokenRecord> {
        self.refresh_tokens.get(&id).cloned()
    }

    pub fn rotate_refresh_token(
        &mut self,
        old_id: Uuid,
        replacement: &RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        if self.refresh_tokens.contains_key(&replacement.id) {
            return Err(StoreError::Conflict("refresh token id".to_string()));
        }
        let Some(old) = self.refresh_tokens.get_mut(&old_id) else {
            return Ok(RotateOutcome::Stale);
        };
        if old.is_revoked() || old.is_expired_at(now) {
            return Ok(RotateOutcome::Stale);
        }
        old.revoked_at = Some(now);
        old.replaced_by = Some(replacement.id);
        self.refresh_tokens
            .insert(replacement.id, replacement.clone());
        Ok(RotateOutcome::Rotated)
    }

    pub fn revoke_refresh_token(&mut self, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.refresh_tokens.get_mut(&id) {
            Some(record) if !record.is_revoked() => {
                record.revoked_at = Some(now);
                true
            }
            _ => false,
        }
    }

    fn revoke_where(
        &mut self,
        now: DateTime<Utc>,
        predicate: impl Fn(&RefreshTokenRecord) -> bool,
    ) -> u64 {
        let mut count = 0;
        for record in self.refresh_tokens.values_mut() {
            if !record.is_revoked() && predicate(record) {
                record.revoked_at = Some(now);
                count += 1;
            }
        }
        count
    }

    pub fn revoke_refresh_token_family(&mut self, family_id: Uuid, now: DateTime<Utc>) -> u64 {
        self.revoke_where(now, |r| r.family_id == family_id)
    }

    pub fn revoke_all_refresh_tokens_for_user(&mut self, user_id: Uuid, now: DateTime<Utc>) -> u64 {
        self.revoke_where(now, |r| r.user_id == user_id)
    }

    pub fn prune_expired_refresh_tokens(&mut self, now: DateTime<Utc>) -> u64 {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|_, r| !r.is_expired_at(now));
        (before - self.refresh_tokens.len()) as u64
    }

    pub fn save_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        if self.api_keys.contains_key(&key.id) {
            return Err(StoreError::Conflict("api key id".to_string()));
        }
        if self.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::Conflict("api key digest".to_string()));
        }
        self.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    pub fn find_api_key_by_digest(&self, key_hash: &str) -> Option<ApiKey> {
        self.api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned()
    }

    pub fn find_api_key_by_id(&self, id: Uuid) -> Option<ApiKey> {
        self.api_keys.get(&id).cloned()
    }

    pub fn list_api_keys_for_user(&self, user_id: Uuid) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self
            .api_keys
            .values()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }

    pub fn revoke_api_key(&mut self, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.api_keys.get_mut(&id) {
            Some(key) if !key.is_revoked() => {
                key.revoked_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn touch_api_key(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let key = self
            .api_keys
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("api key {id}")))?;
        key.last_used_at = Some(at);
        Ok(())
    }
}

/// Behavioural checks every adapter must pass
#[cfg(test)]
pub(crate) mod conformance {
    use super::super::{RotateOutcome, SessionStore, StoreError};
    use crate::models::{ApiKey, RefreshTokenRecord, User, UserFilter, UserRole, UserUpdate};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    pub fn user(username: &str) -> User {
        User::new(
            username.to_string(),
            format!("{username}@example.com"),
            "$argon2id$placeholder".to_string(),
            username.to_string(),
            UserRole::Viewer,
        )
    }

    pub fn token_for(user: &User) -> RefreshTokenRecord {
        RefreshTokenRecord::new(
            user.id,
            Uuid::new_v4(),
            format!("digest-{}", Uuid::new_v4()),
            Utc::now() + Duration::days(7),
        )
    }

    pub async fn users(store: &dyn SessionStore) {
        let alice = user("alice");
        store.create_user(&alice).await.unwrap();

        let dup_name = User {
            email: "other@example.com".to_string(),
            ..user("ALICE")
        };
        assert_eq!(
            store.create_user(&dup_name).await,
            Err(StoreError::Conflict("username".to_string()))
        );

        let dup_email = User {
            email: "Alice@Example.com".to_string(),
            ..user("alice2")
        };
        assert_eq!(
            store.create_user(&dup_email).await,
            Err(StoreError::Conflict("email".to_string()))
        );

        let found = store.find_user_by_username("Alice").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert!(store
            .find_user_by_email("alice@example.com")
            .await
            .unwrap()
            .is_some());

        let updated = store
            .update_user(
                alice.id,
                &UserUpdate {
                    role: Some(UserRole::Editor),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role, UserRole::Editor);

        let bob = user("bob");
        store.create_user(&bob).await.unwrap();
        let taken = store
            .update_user(
                bob.id,
                &UserUpdate {
                    email: Some("alice@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(taken, Err(StoreError::Conflict(_))));

        let editors = store
            .list_users(&UserFilter {
                role: Some(UserRole::Editor),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(editors.len(), 1);

        let now = Utc::now();
        store.update_last_login(alice.id, now).await.unwrap();
        store
            .change_password_digest(alice.id, "$argon2id$new", now)
            .await
            .unwrap();
        let reloaded = store.find_user_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password_hash, "$argon2id$new");
        assert!(reloaded.last_login.is_some());

        assert!(store.delete_user(bob.id).await.unwrap());
        assert!(!store.delete_user(bob.id).await.unwrap());
        assert!(store.find_user_by_id(bob.id).await.unwrap().is_none());
    }

    pub async fn rotation(store: &dyn SessionStore) {
        let alice = user("rotator");
        store.create_user(&alice).await.unwrap();

        let first = token_for(&alice);
        store.save_refresh_token(&first).await.unwrap();

        let second = RefreshTokenRecord::new(
            alice.id,
            first.family_id,
            "digest-second".to_string(),
            Utc::now() + Duration::days(7),
        );
        let now = Utc::now();
        assert_eq!(
            store.rotate_refresh_token(first.id, &second, now).await.unwrap(),
            RotateOutcome::Rotated
        );

        // Same parent again: stale, and the would-be child is not persisted
        let third = RefreshTokenRecord::new(
            alice.id,
            first.family_id,
            "digest-third".to_string(),
            Utc::now() + Duration::days(7),
        );
        assert_eq!(
            store.rotate_refresh_token(first.id, &third, now).await.unwrap(),
            RotateOutcome::Stale
        );
        assert!(store
            .find_refresh_token_by_id(third.id)
            .await
            .unwrap()
            .is_none());

        let parent = store.find_refresh_token_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(parent.replaced_by, Some(second.id));
        assert!(parent.is_revoked());

        assert_eq!(
            store
                .revoke_refresh_token_family(first.family_id, now)
                .await
                .unwrap(),
            1
        );
        assert!(!store.revoke_refresh_token(second.id, now).await.unwrap());

        let other = token_for(&alice);
        store.save_refresh_token(&other).await.unwrap();
        assert_eq!(
            store
                .revoke_all_refresh_tokens_for_user(alice.id, now)
                .await
                .unwrap(),
            1
        );

        let mut expired = token_for(&alice);
        expired.expires_at = Utc::now() - Duration::minutes(1);
        store.save_refresh_token(&expired).await.unwrap();
        let child = token_for(&alice);
        assert_eq!(
            store.rotate_refresh_token(expired.id, &child, Utc::now()).await.unwrap(),
            RotateOutcome::Stale
        );
        assert!(store.prune_expired_refresh_tokens(Utc::now()).await.unwrap() >= 1);
        assert!(store
            .find_refresh_token_by_id(expired.id)
            .await
            .unwrap()
            .is_none());
    }

    pub async fn api_keys(store: &dyn SessionStore) {
        let owner = user("keyholder");
        store.create_user(&owner).await.unwrap();

        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: owner.id,
            name: "ci".to_string(),
            description: Some("pipeline".to_string()),
            key_hash: "key-digest".to_string(),
            prefix: "mck_abcd".to_string(),
            scopes: vec!["metrics:read".to_string()],
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            revoked_at: None,
        };
        store.save_api_key(&key).await.unwrap();

        let found = store.find_api_key_by_digest("key-digest").await.unwrap().unwrap();
        assert_eq!(found.id, key.id);
        assert_eq!(found.scopes, vec!["metrics:read".to_string()]);
        assert_eq!(store.list_api_keys_for_user(owner.id).await.unwrap().len(), 1);

        let now = Utc::now();
        store.touch_api_key(key.id, now).await.unwrap();
        assert!(store
            .find_api_key_by_id(key.id)
            .await
            .unwrap()
            .unwrap()
            .last_used_at
            .is_some());

        assert!(store.revoke_api_key(key.id, now).await.unwrap());
        assert!(!store.revoke_api_key(key.id, now).await.unwrap());
        assert!(store
            .find_api_key_by_id(key.id)
            .await
            .unwrap()
            .unwrap()
            .is_revoked());
    }
}
