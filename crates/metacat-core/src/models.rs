//! Account and credential models
//!
//! This module defines the records owned by a `SessionStore`:
//! - User: account identity, credentials digest, role and status
//! - RefreshTokenRecord: digest of a long-lived refresh secret and its chain position
//! - ApiKey: digest of a long-lived machine credential plus its metadata
//!
//! Raw secrets never appear in these types; only one-way digests do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// User role
///
/// Roles are totally ordered: `Viewer < Editor < Admin`. Every gate is
/// expressed as `role >= required`, so variant order matters.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Viewer,
    Editor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Viewer => "viewer",
            UserRole::Editor => "editor",
            UserRole::Admin => "admin",
        }
    }

    /// Check whether this role satisfies a minimum requirement
    pub fn satisfies(&self, required: UserRole) -> bool {
        *self >= required
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(UserRole::Viewer),
            "editor" => Ok(UserRole::Editor),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User account model
///
/// This is the stored form, including the password digest. Use
/// [`User::to_public`] for anything that leaves the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,

    /// Unique login name
    pub username: String,

    /// Unique email address
    pub email: String,

    /// Password digest (PHC string)
    pub password_hash: String,

    pub display_name: String,

    pub role: UserRole,

    pub status: UserStatus,

    /// Last successful login timestamp
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,

    /// When the password was last changed
    pub password_changed_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new active user with the given credentials
    ///
    /// # Arguments
    ///
    /// * `username` - Unique login name
    /// * `email` - Unique email address
    /// * `password_hash` - Digest produced by the credential verifier
    /// * `display_name` - Human-readable name
    /// * `role` - Initial role
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        display_name: String,
        role: UserRole,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            display_name,
            role,
            status: UserStatus::Active,
            last_login: None,
            password_changed_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Convert user to public representation (without the password digest)
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            status: self.status,
            last_login: self.last_login,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public user representation (safe for API responses)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPublic {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for listing users
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserFilter {
    #[serde(default)]
    pub role: Option<UserRole>,
    #[serde(default)]
    pub status: Option<UserStatus>,
    /// Case-insensitive substring match on username, email, or display name
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            role: None,
            status: None,
            search: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl UserFilter {
    /// Check whether a user passes the role, status and search predicates
    pub fn matches(&self, user: &User) -> bool {
        if self.role.is_some_and(|role| user.role != role) {
            return false;
        }
        if self.status.is_some_and(|status| user.status != status) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                user.username.to_lowercase().contains(&term)
                    || user.email.to_lowercase().contains(&term)
                    || user.display_name.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

/// Partial update of a user profile
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.status.is_none()
    }

    /// Apply the present fields to a user, bumping `updated_at`
    pub fn apply(&self, user: &mut User, now: DateTime<Utc>) {
        if let Some(name) = &self.display_name {
            user.display_name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(status) = self.status {
            user.status = status;
        }
        user.updated_at = now;
    }
}

/// Position of a refresh token in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTokenState {
    Active,
    /// Replaced by a child token during rotation
    Rotated,
    /// Ended by logout, password change, or reuse detection
    Revoked,
    Expired,
}

/// Refresh token record
///
/// Stores the digest of a refresh secret, never the secret itself. Records
/// produced by successive rotations from one login share a `family_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    /// Lookup index sent to the client alongside the secret (not a credential)
    pub id: Uuid,

    pub user_id: Uuid,

    /// Token family (chain of rotations from one login)
    pub family_id: Uuid,

    /// Digest of the refresh secret
    pub token_hash: String,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,

    /// Child record that replaced this one during rotation
    #[serde(default)]
    pub replaced_by: Option<Uuid>,
}

impl RefreshTokenRecord {
    /// Create a new active refresh token record
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owning user
    /// * `family_id` - Family this record joins (a fresh id for a new login)
    /// * `token_hash` - Digest of the refresh secret
    /// * `expires_at` - Expiration time
    pub fn new(
        user_id: Uuid,
        family_id: Uuid,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            family_id,
            token_hash,
            expires_at,
            created_at: Utc::now(),
            revoked_at: None,
            replaced_by: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Derive the lifecycle state at a point in time
    pub fn state_at(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.replaced_by.is_some() {
            RefreshTokenState::Rotated
        } else if self.revoked_at.is_some() {
            RefreshTokenState::Revoked
        } else if self.is_expired_at(now) {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Active
        }
    }
}

/// API key record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKey {
    pub id: Uuid,

    pub user_id: Uuid,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Digest of the raw key
    pub key_hash: String,

    /// Leading characters of the raw key, for display only
    pub prefix: String,

    /// Coarse capabilities such as `metrics:read`
    #[serde(default)]
    pub scopes: Vec<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// A key is usable while it is neither revoked nor expired
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn to_public(&self) -> ApiKeyPublic {
        ApiKeyPublic {
            id: self.id,
            user_id: self.user_id,
            name: self.name.clone(),
            description: self.description.clone(),
            prefix: self.prefix.clone(),
            scopes: self.scopes.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            revoked: self.is_revoked(),
        }
    }
}

/// Public API key representation (no digest)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyPublic {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub prefix: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn sample_user(role: UserRole) -> User {
        User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hash".to_string(),
            "Alice Liddell".to_string(),
            role,
        )
    }

    #[test]
    fn test_user_role_conversion() {
        assert_eq!(UserRole::Admin.as_str(), "admin");
        assert_eq!(UserRole::Editor.as_str(), "editor");
        assert_eq!(UserRole::Viewer.as_str(), "viewer");

        assert_eq!("admin".parse::<UserRole>(), Ok(UserRole::Admin));
        assert_eq!("EDITOR".parse::<UserRole>(), Ok(UserRole::Editor));
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_role_order() {
        assert!(UserRole::Viewer < UserRole::Editor);
        assert!(UserRole::Editor < UserRole::Admin);
        assert!(UserRole::Admin.satisfies(UserRole::Editor));
        assert!(!UserRole::Viewer.satisfies(UserRole::Editor));
        assert_eq!(UserRole::default(), UserRole::Viewer);
    }

    fn arb_role() -> impl Strategy<Value = UserRole> {
        prop_oneof![
            Just(UserRole::Viewer),
            Just(UserRole::Editor),
            Just(UserRole::Admin),
        ]
    }

    proptest! {
        #[test]
        fn role_satisfies_is_transitive(a in arb_role(), b in arb_role(), c in arb_role()) {
            if a.satisfies(b) && b.satisfies(c) {
                prop_assert!(a.satisfies(c));
            }
        }

        #[test]
        fn role_order_is_total(a in arb_role(), b in arb_role()) {
            prop_assert!(a.satisfies(b) || b.satisfies(a));
        }

        #[test]
        fn role_string_round_trips(a in arb_role()) {
            prop_assert_eq!(a.as_str().parse::<UserRole>(), Ok(a));
        }
    }

    #[test]
    fn test_user_to_public_hides_digest() {
        let user = sample_user(UserRole::Admin);
        let public = user.to_public();

        assert_eq!(public.username, user.username);
        assert_eq!(public.role, UserRole::Admin);

        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("\"hash\""));
    }

    #[test]
    fn test_user_filter() {
        let mut user = sample_user(UserRole::Editor);
        assert!(UserFilter::default().matches(&user));

        let by_role = UserFilter {
            role: Some(UserRole::Admin),
            ..Default::default()
        };
        assert!(!by_role.matches(&user));

        let by_search = UserFilter {
            search: Some("LIDDELL".to_string()),
            ..Default::default()
        };
        assert!(by_search.matches(&user));

        user.status = UserStatus::Suspended;
        let active_only = UserFilter {
            status: Some(UserStatus::Active),
            ..Default::default()
        };
        assert!(!active_only.matches(&user));
    }

    #[test]
    fn test_user_update_apply() {
        let mut user = sample_user(UserRole::Viewer);
        let update = UserUpdate {
            role: Some(UserRole::Editor),
            status: Some(UserStatus::Suspended),
            ..Default::default()
        };
        let later = user.updated_at + Duration::seconds(5);
        update.apply(&mut user, later);

        assert_eq!(user.role, UserRole::Editor);
        assert_eq!(user.status, UserStatus::Suspended);
        assert_eq!(user.display_name, "Alice Liddell");
        assert_eq!(user.updated_at, later);
        assert!(UserUpdate::default().is_empty());
    }

    #[test]
    fn test_refresh_token_state() {
        let now = Utc::now();
        let mut token = RefreshTokenRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "digest".to_string(),
            now + Duration::days(7),
        );
        assert_eq!(token.state_at(now), RefreshTokenState::Active);
        assert_eq!(
            token.state_at(now + Duration::days(8)),
            RefreshTokenState::Expired
        );

        token.revoked_at = Some(now);
        assert_eq!(token.state_at(now), RefreshTokenState::Revoked);

        token.replaced_by = Some(Uuid::new_v4());
        assert_eq!(token.state_at(now), RefreshTokenState::Rotated);
    }

    #[test]
    fn test_api_key_usability() {
        let now = Utc::now();
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "ci".to_string(),
            description: None,
            key_hash: "digest".to_string(),
            prefix: "mck_abcd".to_string(),
            scopes: vec!["metrics:read".to_string()],
            created_at: now,
            expires_at: Some(now + Duration::hours(1)),
            last_used_at: None,
            revoked_at: None,
        };
        assert!(key.is_usable_at(now));
        assert!(!key.is_usable_at(now + Duration::hours(2)));

        key.revoked_at = Some(now);
        assert!(!key.is_usable_at(now));

        let json = serde_json::to_string(&key.to_public()).unwrap();
        assert!(!json.contains("digest"));
        assert!(json.contains("\"revoked\":true"));
    }
}
