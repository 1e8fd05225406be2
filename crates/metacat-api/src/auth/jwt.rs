//! Access and refresh token issuance
//!
//! Access tokens are HS256 JWTs verified without touching the store.
//! Refresh tokens are opaque: `<token_id>.<secret>`, where the id indexes the
//! stored record and only the secret's digest is persisted.

use super::secret::{digest_secret, generate_secret};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metacat_core::{
    AuthConfig, AuthError, RefreshTokenRecord, User, UserRole, MAX_ACCESS_TOKEN_TTL_SECS,
    MAX_REFRESH_TOKEN_TTL_DAYS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// JWT claims carried by an access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: Uuid,
    /// Unique token identifier
    pub jti: Uuid,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    /// Refresh-token family this access token was minted from
    pub fam: Uuid,
    /// Signing key identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Token verification errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Failed to encode token: {0}")]
    Encoding(String),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(msg) => AuthError::Internal(msg),
            _ => AuthError::Authentication,
        }
    }
}

/// Freshly minted credentials, returned to the client once
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub access_expires_in: u64,
    pub refresh_token_id: Uuid,
    pub refresh_secret: String,
}

impl TokenPair {
    /// Wire form of the refresh token
    pub fn refresh_token(&self) -> String {
        format_refresh_token(self.refresh_token_id, &self.refresh_secret)
    }
}

/// A token pair plus the record the caller must persist for it
#[derive(Debug, Clone)]
pub struct IssuedPair {
    pub tokens: TokenPair,
    pub record: RefreshTokenRecord,
}

/// Signs and verifies tokens; holds no mutable state
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
    validation: Validation,
    issuer: String,
    key_id: Option<String>,
    access_ttl_secs: u64,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("key_id", &self.key_id)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = config.key_id.clone();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            header,
            validation,
            issuer: config.issuer.clone(),
            key_id: config.key_id.clone(),
            // Clamped so an unvalidated config cannot overflow the timestamps
            access_ttl_secs: config
                .access_token_ttl_secs
                .clamp(1, MAX_ACCESS_TOKEN_TTL_SECS),
            refresh_ttl: Duration::days(
                config
                    .refresh_token_ttl_days
                    .clamp(1, MAX_REFRESH_TOKEN_TTL_DAYS),
            ),
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    /// Issue an access token and a fresh refresh secret for `user`
    ///
    /// `family_id` is a new id at login and the parent's family on rotation.
    pub fn issue_pair(&self, user: &User, family_id: Uuid) -> Result<IssuedPair, TokenError> {
        let now = Utc::now();
        let access_token = self.sign_access(user, family_id, now)?;

        let refresh_secret = generate_secret();
        let record = RefreshTokenRecord::new(
            user.id,
            family_id,
            digest_secret(&refresh_secret),
            now + self.refresh_ttl,
        );

        Ok(IssuedPair {
            tokens: TokenPair {
                access_token,
                access_expires_in: self.access_ttl_secs,
                refresh_token_id: record.id,
                refresh_secret,
            },
            record,
        })
    }

    fn sign_access(
        &self,
        user: &User,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: user.id,
            jti: Uuid::new_v4(),
            iat,
            exp: iat + self.access_ttl_secs as i64,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            fam: family_id,
            kid: self.key_id.clone(),
        };

        encode(&self.header, &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify an access token's signature, issuer and expiry
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        use jsonwebtoken::errors::ErrorKind;

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            })
    }

    /// One-way digest used to compare refresh secrets
    pub fn digest_refresh_secret(secret: &str) -> String {
        digest_secret(secret)
    }
}

/// Join a token id and secret into the refresh token wire form
pub fn format_refresh_token(token_id: Uuid, secret: &str) -> String {
    format!("{}.{}", token_id.simple(), secret)
}

/// Split a refresh token into its record id and secret
pub fn parse_refresh_token(raw: &str) -> Result<(Uuid, &str), TokenError> {
    let (id, secret) = raw.trim().split_once('.').ok_or(TokenError::Malformed)?;
    if secret.is_empty() || secret.contains('.') {
        return Err(TokenError::Malformed);
    }
    let id = Uuid::try_parse(id).map_err(|_| TokenError::Malformed)?;
    Ok((id, secret))
}
