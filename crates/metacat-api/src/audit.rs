//! Security audit logging for credential and session events
//!
//! Every event is emitted at INFO level on the `audit` target so it can be
//! filtered and routed separately from application logs, e.g.
//! `RUST_LOG=audit=info,metacat_api=warn`.
//!
//! Raw passwords, refresh secrets and API keys never appear in events.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: Uuid,
        username: String,
    },

    /// Failed login; `identifier` is the username or email as presented
    LoginFailure {
        identifier: String,
        reason: String,
    },

    Logout {
        user_id: Uuid,
        sessions_revoked: u64,
        logout_all_devices: bool,
    },

    TokenRefresh {
        user_id: Uuid,
        family_id: Uuid,
    },

    /// A rotated or revoked refresh token was presented again
    RefreshTokenReuse {
        user_id: Uuid,
        family_id: Uuid,
        sessions_revoked: u64,
    },

    RegistrationSuccess {
        user_id: Uuid,
        username: String,
        role: String,
    },

    RegistrationFailure {
        username: String,
        reason: String,
    },

    PasswordChange {
        user_id: Uuid,
        sessions_revoked: u64,
    },

    AccessDenied {
        user_id: Option<Uuid>,
        resource: String,
        required: Option<String>,
        ip_address: Option<String>,
    },

    InvalidToken {
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    ApiKeyCreated {
        user_id: Uuid,
        key_id: Uuid,
        prefix: String,
    },

    ApiKeyRevoked {
        key_id: Uuid,
        owner_id: Uuid,
        revoked_by: Uuid,
    },

    UserCreated {
        user_id: Uuid,
        role: String,
        created_by: Uuid,
    },

    UserUpdated {
        user_id: Uuid,
        fields: Vec<String>,
        updated_by: Uuid,
        sessions_revoked: u64,
    },

    UserDeleted {
        user_id: Uuid,
        deleted_by: Uuid,
    },
}

impl AuditEvent {
    /// Short label used as the log message
    pub fn label(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshTokenReuse { .. } => "Refresh token reuse detected",
            AuditEvent::RegistrationSuccess { .. } => "User registered",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::PasswordChange { .. } => "Password changed",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::InvalidToken { .. } => "Invalid credential presented",
            AuditEvent::ApiKeyCreated { .. } => "API key created",
            AuditEvent::ApiKeyRevoked { .. } => "API key revoked",
            AuditEvent::UserCreated { .. } => "User created by administrator",
            AuditEvent::UserUpdated { .. } => "User updated by administrator",
            AuditEvent::UserDeleted { .. } => "User deleted by administrator",
        }
    }

    /// Serde tag of the event
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "login_success",
            AuditEvent::LoginFailure { .. } => "login_failure",
            AuditEvent::Logout { .. } => "logout",
            AuditEvent::TokenRefresh { .. } => "token_refresh",
            AuditEvent::RefreshTokenReuse { .. } => "refresh_token_reuse",
            AuditEvent::RegistrationSuccess { .. } => "registration_success",
            AuditEvent::RegistrationFailure { .. } => "registration_failure",
            AuditEvent::PasswordChange { .. } => "password_change",
            AuditEvent::AccessDenied { .. } => "access_denied",
            AuditEvent::InvalidToken { .. } => "invalid_token",
            AuditEvent::ApiKeyCreated { .. } => "api_key_created",
            AuditEvent::ApiKeyRevoked { .. } => "api_key_revoked",
            AuditEvent::UserCreated { .. } => "user_created",
            AuditEvent::UserUpdated { .. } => "user_updated",
            AuditEvent::UserDeleted { .. } => "user_deleted",
        }
    }

    /// Account the event is about, when there is one
    pub fn subject(&self) -> Option<Uuid> {
        match self {
            AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::RefreshTokenReuse { user_id, .. }
            | AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::PasswordChange { user_id, .. }
            | AuditEvent::ApiKeyCreated { user_id, .. }
            | AuditEvent::UserCreated { user_id, .. }
            | AuditEvent::UserUpdated { user_id, .. }
            | AuditEvent::UserDeleted { user_id, .. } => Some(*user_id),
            AuditEvent::ApiKeyRevoked { owner_id, .. } => Some(*owner_id),
            AuditEvent::AccessDenied { user_id, .. } => *user_id,
            AuditEvent::LoginFailure { .. }
            | AuditEvent::RegistrationFailure { .. }
            | AuditEvent::InvalidToken { .. } => None,
        }
    }
}

/// Log a security audit event with structured fields
///
/// The full event is serialized to JSON in the `event` field for log
/// aggregators; `event_type` and `user_id` are lifted out for filtering.
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));
    let event_type = event.event_type();

    match event.subject() {
        Some(user_id) => info!(
            target: "audit",
            event_type,
            user_id = %user_id,
            event = %event_json,
            "{}",
            event.label()
        ),
        None => info!(
            target: "audit",
            event_type,
            event = %event_json,
            "{}",
            event.label()
        ),
    }
}

/// Extract the client IP address from proxy headers
///
/// Checks X-Forwarded-For (first hop) and then X-Real-IP.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
    {
        return Some(first_ip.trim().to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_success\""));
        assert!(json.contains("alice"));
        assert_eq!(event.event_type(), "login_success");
    }

    #[test]
    fn test_event_type_matches_serde_tag() {
        let events = vec![
            AuditEvent::RefreshTokenReuse {
                user_id: Uuid::new_v4(),
                family_id: Uuid::new_v4(),
                sessions_revoked: 2,
            },
            AuditEvent::InvalidToken {
                reason: "expired".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::UserUpdated {
                user_id: Uuid::new_v4(),
                fields: vec!["status".to_string()],
                updated_by: Uuid::new_v4(),
                sessions_revoked: 1,
            },
        ];

        for event in events {
            let json: serde_json::Value = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event_type"], event.event_type());
            audit_log(&event);
        }
    }

    #[test]
    fn test_subject() {
        let owner = Uuid::new_v4();
        let event = AuditEvent::ApiKeyRevoked {
            key_id: Uuid::new_v4(),
            owner_id: owner,
            revoked_by: Uuid::new_v4(),
        };
        assert_eq!(event.subject(), Some(owner));

        let failure = AuditEvent::LoginFailure {
            identifier: "mallory".to_string(),
            reason: "unknown user".to_string(),
        };
        assert_eq!(failure.subject(), None);
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
