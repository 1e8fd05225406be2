/// Password strength rules and hashing with Argon2id
///
/// `CredentialVerifier` owns the configured policy and Argon2 parameters.
/// Hashing is CPU-bound, so async callers go through the `*_async`
/// variants, which move the work onto the blocking thread pool.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use metacat_core::{AuthError, PasswordHashConfig, PasswordPolicy};
use serde::Serialize;
use utoipa::ToSchema;

/// Outcome of a password strength check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StrengthReport {
    pub valid: bool,
    /// Every violated rule, in policy order
    pub reasons: Vec<String>,
}

/// Validates, hashes and verifies passwords
#[derive(Clone)]
pub struct CredentialVerifier {
    policy: PasswordPolicy,
    params: Params,
    /// Digest of a throwaway password, verified when no account matches
    dummy_digest: String,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("policy", &self.policy)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    /// Build a verifier from the configured policy and Argon2 parameters
    pub fn new(policy: PasswordPolicy, config: &PasswordHashConfig) -> Result<Self, AuthError> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            config.output_len,
        )
        .map_err(|e| AuthError::Internal(format!("invalid Argon2 parameters: {e}")))?;

        let mut verifier = Self {
            policy,
            params,
            dummy_digest: String::new(),
        };
        verifier.dummy_digest = verifier.hash("metacat-timing-equaliser")?;
        Ok(verifier)
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Check a password against the policy, collecting every violation
    ///
    /// # Example
    ///
    /// ```no_run
    /// use metacat_api::auth::CredentialVerifier;
    /// use metacat_core::{PasswordHashConfig, PasswordPolicy};
    ///
    /// let verifier = CredentialVerifier::new(
    ///     PasswordPolicy::default(),
    ///     &PasswordHashConfig::fast_insecure(),
    /// ).unwrap();
    /// let report = verifier.validate_strength("a");
    /// assert!(!report.valid);
    /// assert!(report.reasons.len() >= 3);
    /// ```
    pub fn validate_strength(&self, password: &str) -> StrengthReport {
        let policy = &self.policy;
        let mut reasons = Vec::new();

        if password.chars().count() < policy.min_length {
            reasons.push(format!(
                "Password must be at least {} characters long",
                policy.min_length
            ));
        }
        if policy.require_uppercase && !password.chars().any(char::is_uppercase) {
            reasons.push("Password must contain at least one uppercase letter".to_string());
        }
        if policy.require_lowercase && !password.chars().any(char::is_lowercase) {
            reasons.push("Password must contain at least one lowercase letter".to_string());
        }
        if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            reasons.push("Password must contain at least one digit".to_string());
        }
        if policy.require_special && !password.chars().any(|c| !c.is_alphanumeric()) {
            reasons.push("Password must contain at least one special character".to_string());
        }

        StrengthReport {
            valid: reasons.is_empty(),
            reasons,
        }
    }

    /// Hash a password into a PHC string (salt and parameters included)
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        );

        argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("failed to hash password: {e}")))
    }

    /// Verify a password against a stored PHC digest
    ///
    /// The parameters embedded in the digest are used, so digests produced
    /// under older settings keep verifying.
    pub fn verify(&self, password: &str, digest: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(digest)
            .map_err(|_| AuthError::Internal("stored password digest is malformed".to_string()))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!(
                "failed to verify password: {e}"
            ))),
        }
    }

    /// Spend the same effort as a real verification, always failing
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_digest);
    }

    pub async fn hash_async(&self, password: &str) -> Result<String, AuthError> {
        let verifier = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || verifier.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }

    pub async fn verify_async(&self, password: &str, digest: &str) -> Result<bool, AuthError> {
        let verifier = self.clone();
        let password = password.to_string();
        let digest = digest.to_string();
        tokio::task::spawn_blocking(move || verifier.verify(&password, &digest))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))?
    }

    pub async fn verify_dummy_async(&self, password: &str) {
        let verifier = self.clone();
        let password = password.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || verifier.verify_dummy(&password)).await
        {
            tracing::warn!(error = %e, "Dummy verification task failed");
        }
    }
}
