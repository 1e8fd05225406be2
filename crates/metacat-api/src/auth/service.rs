//! Authentication service layer
//!
//! Registration, login, refresh-token rotation, logout, password changes and
//! administrator account management. The service holds no session state of
//! its own: everything durable lives in the injected `SessionStore`, and every
//! store call goes through the configured [`StorePolicy`].

use super::jwt::{parse_refresh_token, IssuedPair, TokenService};
use super::password::CredentialVerifier;
use super::retry::StorePolicy;
use super::secret::digests_match;
use crate::audit::{audit_log, AuditEvent};
use chrono::{DateTime, Utc};
use metacat_core::{
    AuthConfig, AuthError, RefreshTokenState, RotateOutcome, SessionStore, User, UserFilter,
    UserPublic, UserRole, UserStatus, UserUpdate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

/// Upper bound on `limit` when listing users
pub const MAX_PAGE_SIZE: usize = 200;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 64, message = "Username must be 3-64 characters long"),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters long"))]
    pub display_name: Option<String>,
    /// Requested role; anything above viewer requires an administrator caller
    #[serde(default)]
    pub role: Option<UserRole>,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email address
    #[serde(alias = "email")]
    pub username: String,
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Revoke every refresh token the caller holds
    #[serde(default)]
    pub logout_all_devices: bool,
}

/// Password change request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Administrator account creation request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreateUserRequest {
    #[validate(
        length(min = 3, max = 64, message = "Username must be 3-64 characters long"),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[validate(email(message = "Email must be a valid address"))]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters long"))]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

/// Administrator account update request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters long"))]
    pub display_name: Option<String>,
    #[validate(email(message = "Email must be a valid address"))]
    pub email: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
}

impl UpdateUserRequest {
    fn to_update(&self) -> UserUpdate {
        UserUpdate {
            display_name: self.display_name.as_deref().map(|s| s.trim().to_string()),
            email: self.email.as_deref().map(|s| s.trim().to_lowercase()),
            role: self.role,
            status: self.status,
        }
    }

    fn changed_fields(&self) -> Vec<String> {
        [
            ("display_name", self.display_name.is_some()),
            ("email", self.email.is_some()),
            ("role", self.role.is_some()),
            ("status", self.status.is_some()),
        ]
        .into_iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Authentication response with tokens
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    /// Opaque refresh token, `<token_id>.<secret>`
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: UserPublic,
}

fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("username_charset");
        err.message =
            Some("Username may only contain letters, digits, '_', '.' and '-'".into());
        Err(err)
    }
}

/// Flatten validator output into human-readable reasons
pub(crate) fn validation_reasons(errors: &ValidationErrors) -> Vec<String> {
    let mut reasons: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{field} is invalid ({})", e.code),
            })
        })
        .collect();
    reasons.sort();
    reasons
}

fn describe_conflict(err: AuthError) -> AuthError {
    match err {
        AuthError::Conflict(field) => AuthError::Conflict(format!("{field} already exists")),
        other => other,
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn SessionStore>,
    verifier: CredentialVerifier,
    tokens: Arc<TokenService>,
    policy: StorePolicy,
    revoke_family_on_reuse: bool,
}

impl AuthService {
    /// Create a new authentication service over `store`
    pub fn new(
        store: Arc<dyn SessionStore>,
        config: &AuthConfig,
        policy: StorePolicy,
    ) -> Result<Self, AuthError> {
        let verifier = CredentialVerifier::new(config.password_policy.clone(), &config.password_hash)?;
        Ok(Self {
            store,
            verifier,
            tokens: Arc::new(TokenService::new(config)),
            policy,
            revoke_family_on_reuse: config.revoke_family_on_reuse,
        })
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    pub fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    // ------------------------------------------------------------------
    // Registration & login
    // ------------------------------------------------------------------

    /// Register a new account and open its first session
    ///
    /// `caller_role` is the role of an already authenticated caller, if any;
    /// only an administrator may request a role above viewer.
    pub async fn register(
        &self,
        request: RegisterRequest,
        caller_role: Option<UserRole>,
    ) -> Result<AuthResponse, AuthError> {
        let role = request.role.unwrap_or_default();
        if role > UserRole::Viewer && caller_role != Some(UserRole::Admin) {
            audit_log(&AuditEvent::RegistrationFailure {
                username: request.username.clone(),
                reason: format!("role {role} requested without administrator"),
            });
            return Err(AuthError::Authorization(
                "Only administrators may assign elevated roles".to_string(),
            ));
        }

        let user = match self
            .create_account(
                &request.username,
                &request.email,
                &request.password,
                request.display_name.as_deref(),
                role,
                request.validate(),
            )
            .await
        {
            Ok(user) => user,
            Err(e) => {
                audit_log(&AuditEvent::RegistrationFailure {
                    username: request.username.clone(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let response = self.start_session(&user).await?;

        audit_log(&AuditEvent::RegistrationSuccess {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role.to_string(),
        });

        Ok(response)
    }

    async fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        role: UserRole,
        validation: Result<(), ValidationErrors>,
    ) -> Result<User, AuthError> {
        let mut reasons = validation
            .err()
            .map(|e| validation_reasons(&e))
            .unwrap_or_default();
        reasons.extend(self.verifier.validate_strength(password).reasons);
        if !reasons.is_empty() {
            return Err(AuthError::Validation(reasons));
        }

        let username = username.trim();
        let email = email.trim().to_lowercase();

        if self
            .policy
            .call("find_user_by_username", || {
                self.store.find_user_by_username(username)
            })
            .await?
            .is_some()
        {
            return Err(AuthError::Conflict("username already exists".to_string()));
        }
        if self
            .policy
            .call("find_user_by_email", || self.store.find_user_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AuthError::Conflict("email already exists".to_string()));
        }

        let digest = self.verifier.hash_async(password).await?;
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(username);

        let user = User::new(
            username.to_string(),
            email,
            digest,
            display_name.to_string(),
            role,
        );

        // The store's unique indexes settle races between the checks above
        self.policy
            .call("create_user", || self.store.create_user(&user))
            .await
            .map_err(describe_conflict)?;

        Ok(user)
    }

    /// Log in with a username or email and a password
    ///
    /// Unknown accounts and wrong passwords fail identically. The password is
    /// checked before the account status, so a suspended account is only
    /// reported as such to someone who knows its password.
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, AuthError> {
        let identifier = request.username.trim();
        if identifier.is_empty() || request.password.is_empty() {
            return Err(AuthError::validation("Username and password are required"));
        }

        let found = if identifier.contains('@') {
            let email = identifier.to_lowercase();
            self.policy
                .call("find_user_by_email", || self.store.find_user_by_email(&email))
                .await?
        } else {
            self.policy
                .call("find_user_by_username", || {
                    self.store.find_user_by_username(identifier)
                })
                .await?
        };

        let Some(mut user) = found else {
            self.verifier.verify_dummy_async(&request.password).await;
            audit_log(&AuditEvent::LoginFailure {
                identifier: identifier.to_string(),
                reason: "unknown account".to_string(),
            });
            return Err(AuthError::Authentication);
        };

        if !self
            .verifier
            .verify_async(&request.password, &user.password_hash)
            .await?
        {
            audit_log(&AuditEvent::LoginFailure {
                identifier: identifier.to_string(),
                reason: "wrong password".to_string(),
            });
            return Err(AuthError::Authentication);
        }

        if !user.is_active() {
            audit_log(&AuditEvent::LoginFailure {
                identifier: identifier.to_string(),
                reason: format!("account {}", user.status),
            });
            return Err(AuthError::Authorization(format!(
                "Account is {}",
                user.status
            )));
        }

        let now = Utc::now();
        self.policy
            .call("update_last_login", || {
                self.store.update_last_login(user.id, now)
            })
            .await?;
        user.last_login = Some(now);

        let response = self.start_session(&user).await?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            username: user.username.clone(),
        });

        Ok(response)
    }

    /// Issue a pair in a brand-new token family and persist its record
    async fn start_session(&self, user: &User) -> Result<AuthResponse, AuthError> {
        let issued = self.tokens.issue_pair(user, Uuid::new_v4())?;
        self.policy
            .call("save_refresh_token", || {
                self.store.save_refresh_token(&issued.record)
            })
            .await?;
        Ok(Self::respond(issued, user))
    }

    fn respond(issued: IssuedPair, user: &User) -> AuthResponse {
        AuthResponse {
            refresh_token: issued.tokens.refresh_token(),
            access_token: issued.tokens.access_token,
            token_type: "Bearer".to_string(),
            expires_in: issued.tokens.access_expires_in,
            user: user.to_public(),
        }
    }

    // ------------------------------------------------------------------
    // Refresh rotation
    // ------------------------------------------------------------------

    /// Exchange a refresh token for a new pair, revoking the presented one
    ///
    /// Of several concurrent calls presenting the same token, at most one
    /// succeeds; the rest fail with `Authentication`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        let (token_id, secret) = parse_refresh_token(refresh_token).map_err(|e| {
            debug!(error = %e, "Unparseable refresh token");
            AuthError::Authentication
        })?;

        let record = self
            .policy
            .call("find_refresh_token_by_id", || {
                self.store.find_refresh_token_by_id(token_id)
            })
            .await?
            .ok_or(AuthError::Authentication)?;

        if !digests_match(&TokenService::digest_refresh_secret(secret), &record.token_hash) {
            warn!(token_id = %token_id, "Refresh token secret mismatch");
            return Err(AuthError::Authentication);
        }

        let now = Utc::now();
        match record.state_at(now) {
            RefreshTokenState::Active => {}
            RefreshTokenState::Expired => return Err(AuthError::Authentication),
            RefreshTokenState::Rotated | RefreshTokenState::Revoked => {
                self.handle_reuse(record.user_id, record.family_id, now)
                    .await;
                return Err(AuthError::Authentication);
            }
        }

        let user = self
            .policy
            .call("find_user_by_id", || self.store.find_user_by_id(record.user_id))
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::Authentication)?;

        let issued = self.tokens.issue_pair(&user, record.family_id)?;
        let outcome = self
            .policy
            .call("rotate_refresh_token", || {
                self.store
                    .rotate_refresh_token(record.id, &issued.record, now)
            })
            .await?;

        if outcome == RotateOutcome::Stale {
            // Another request rotated this token between our read and write
            debug!(token_id = %token_id, "Lost refresh rotation race");
            return Err(AuthError::Authentication);
        }

        audit_log(&AuditEvent::TokenRefresh {
            user_id: user.id,
            family_id: record.family_id,
        });

        Ok(Self::respond(issued, &user))
    }

    async fn handle_reuse(&self, user_id: Uuid, family_id: Uuid, now: DateTime<Utc>) {
        let sessions_revoked = if self.revoke_family_on_reuse {
            match self
                .policy
                .call("revoke_refresh_token_family", || {
                    self.store.revoke_refresh_token_family(family_id, now)
                })
                .await
            {
                Ok(count) => count,
                Err(e) => {
                    error!(error = %e, family_id = %family_id, "Failed to revoke token family after reuse");
                    0
                }
            }
        } else {
            0
        };

        audit_log(&AuditEvent::RefreshTokenReuse {
            user_id,
            family_id,
            sessions_revoked,
        });
    }

    // ------------------------------------------------------------------
    // Logout & password change
    // ------------------------------------------------------------------

    /// Revoke the presented refresh token and optionally every other one
    ///
    /// Never fails: unknown, foreign or already revoked tokens and store
    /// failures are logged and otherwise ignored.
    pub async fn logout(&self, user_id: Uuid, request: &LogoutRequest) {
        let now = Utc::now();
        let mut sessions_revoked = 0;

        if let Some(raw) = request.refresh_token.as_deref() {
            match self.revoke_presented(user_id, raw, now).await {
                Ok(true) => sessions_revoked += 1,
                Ok(false) => debug!(user_id = %user_id, "Refresh token already revoked at logout"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Refresh token not revoked at logout"),
            }
        }

        if request.logout_all_devices {
            match self
                .policy
                .call("revoke_all_refresh_tokens_for_user", || {
                    self.store.revoke_all_refresh_tokens_for_user(user_id, now)
                })
                .await
            {
                Ok(count) => sessions_revoked += count,
                Err(e) => warn!(user_id = %user_id, error = %e, "Failed to revoke sessions at logout"),
            }
        }

        audit_log(&AuditEvent::Logout {
            user_id,
            sessions_revoked,
            logout_all_devices: request.logout_all_devices,
        });
    }

    async fn revoke_presented(
        &self,
        user_id: Uuid,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let (token_id, secret) = parse_refresh_token(raw)?;
        let record = self
            .policy
            .call("find_refresh_token_by_id", || {
                self.store.find_refresh_token_by_id(token_id)
            })
            .await?
            .ok_or_else(|| AuthError::NotFound("refresh token".to_string()))?;

        if record.user_id != user_id
            || !digests_match(&TokenService::digest_refresh_secret(secret), &record.token_hash)
        {
            return Err(AuthError::Authorization(
                "refresh token belongs to another session".to_string(),
            ));
        }

        self.policy
            .call("revoke_refresh_token", || {
                self.store.revoke_refresh_token(record.id, now)
            })
            .await
    }

    /// Change a password and end every session of the account
    ///
    /// Access tokens already issued stay valid until they expire.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        request: &ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        let user = self
            .policy
            .call("find_user_by_id", || self.store.find_user_by_id(user_id))
            .await?
            .ok_or(AuthError::Authentication)?;

        if !self
            .verifier
            .verify_async(&request.current_password, &user.password_hash)
            .await?
        {
            return Err(AuthError::Authentication);
        }

        let mut reasons = self.verifier.validate_strength(&request.new_password).reasons;
        if request.new_password == request.current_password {
            reasons.push("New password must differ from the current password".to_string());
        }
        if !reasons.is_empty() {
            return Err(AuthError::Validation(reasons));
        }

        let digest = self.verifier.hash_async(&request.new_password).await?;
        let now = Utc::now();

        // Sessions go first: a failure after this point leaves the old
        // password in place, so the same request can simply be retried.
        let sessions_revoked = self
            .policy
            .call("revoke_all_refresh_tokens_for_user", || {
                self.store.revoke_all_refresh_tokens_for_user(user.id, now)
            })
            .await?;

        self.policy
            .call("change_password_digest", || {
                self.store.change_password_digest(user.id, &digest, now)
            })
            .await?;

        audit_log(&AuditEvent::PasswordChange {
            user_id: user.id,
            sessions_revoked,
        });

        Ok(())
    }

    // ------------------------------------------------------------------
    // Account queries and administration
    // ------------------------------------------------------------------

    pub async fn get_user(&self, user_id: Uuid) -> Result<UserPublic, AuthError> {
        self.policy
            .call("find_user_by_id", || self.store.find_user_by_id(user_id))
            .await?
            .map(|user| user.to_public())
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))
    }

    pub async fn list_users(&self, mut filter: UserFilter) -> Result<Vec<UserPublic>, AuthError> {
        filter.limit = filter.limit.clamp(1, MAX_PAGE_SIZE);
        let users = self
            .policy
            .call("list_users", || self.store.list_users(&filter))
            .await?;
        Ok(users.iter().map(User::to_public).collect())
    }

    /// Create an account with any role (administrators only)
    pub async fn create_user(
        &self,
        actor: Uuid,
        request: CreateUserRequest,
    ) -> Result<UserPublic, AuthError> {
        let user = self
            .create_account(
                &request.username,
                &request.email,
                &request.password,
                request.display_name.as_deref(),
                request.role,
                request.validate(),
            )
            .await?;

        audit_log(&AuditEvent::UserCreated {
            user_id: user.id,
            role: user.role.to_string(),
            created_by: actor,
        });

        Ok(user.to_public())
    }

    /// Update profile, role or status (administrators only)
    ///
    /// Moving an account out of `active` revokes all of its refresh tokens.
    pub async fn update_user(
        &self,
        actor: Uuid,
        user_id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<UserPublic, AuthError> {
        if let Err(e) = request.validate() {
            return Err(AuthError::Validation(validation_reasons(&e)));
        }

        let update = request.to_update();
        if update.is_empty() {
            return Err(AuthError::validation("No fields to update"));
        }
        if actor == user_id
            && (update.role.is_some_and(|role| role < UserRole::Admin)
                || update.status.is_some_and(|status| status != UserStatus::Active))
        {
            return Err(AuthError::validation(
                "Administrators cannot demote or deactivate their own account",
            ));
        }

        let user = self
            .policy
            .call("update_user", || self.store.update_user(user_id, &update))
            .await
            .map_err(|e| match e {
                AuthError::NotFound(_) => AuthError::NotFound("User not found".to_string()),
                other => describe_conflict(other),
            })?;

        let sessions_revoked = if user.is_active() {
            0
        } else {
            let now = Utc::now();
            self.policy
                .call("revoke_all_refresh_tokens_for_user", || {
                    self.store.revoke_all_refresh_tokens_for_user(user.id, now)
                })
                .await?
        };

        audit_log(&AuditEvent::UserUpdated {
            user_id: user.id,
            fields: request.changed_fields(),
            updated_by: actor,
            sessions_revoked,
        });

        Ok(user.to_public())
    }

    /// Delete an account after revoking its sessions and API keys
    pub async fn delete_user(&self, actor: Uuid, user_id: Uuid) -> Result<(), AuthError> {
        if actor == user_id {
            return Err(AuthError::validation(
                "Administrators cannot delete their own account",
            ));
        }

        self.policy
            .call("find_user_by_id", || self.store.find_user_by_id(user_id))
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;

        let now = Utc::now();
        self.policy
            .call("revoke_all_refresh_tokens_for_user", || {
                self.store.revoke_all_refresh_tokens_for_user(user_id, now)
            })
            .await?;

        let keys = self
            .policy
            .call("list_api_keys_for_user", || {
                self.store.list_api_keys_for_user(user_id)
            })
            .await?;
        for key in keys.iter().filter(|key| !key.is_revoked()) {
            self.policy
                .call("revoke_api_key", || self.store.revoke_api_key(key.id, now))
                .await?;
        }

        let deleted = self
            .policy
            .call("delete_user", || self.store.delete_user(user_id))
            .await?;
        if !deleted {
            return Err(AuthError::NotFound("User not found".to_string()));
        }

        audit_log(&AuditEvent::UserDeleted {
            user_id,
            deleted_by: actor,
        });

        Ok(())
    }

    /// Delete expired refresh-token records
    pub async fn prune_expired(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        self.policy
            .call("prune_expired_refresh_tokens", || {
                self.store.prune_expired_refresh_tokens(now)
            })
            .await
    }
}
