//! API error handling
//!
//! Every failure leaves the API as `{code, message, details?}`. Internal and
//! store failures are logged here and answered with a generic message.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metacat_core::AuthError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Individual validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Validation(Vec<String>),
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    NotImplemented(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::Validation(reasons) => {
                ApiError::new("VALIDATION_ERROR", "Request validation failed").with_details(reasons)
            }
            AppError::Unauthorized => ApiError::unauthorized(),
            AppError::Forbidden(msg) => ApiError::new("FORBIDDEN", msg),
            AppError::NotFound(msg) => ApiError::new("NOT_FOUND", msg),
            AppError::Conflict(msg) => ApiError::new("CONFLICT", msg),
            AppError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "Request failed on an unavailable store");
                ApiError::new(
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable, please retry",
                )
            }
            AppError::NotImplemented(msg) => {
                tracing::warn!(error = %msg, "Unsupported store operation requested");
                ApiError::new("NOT_IMPLEMENTED", "Operation not supported by this deployment")
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ApiError::internal_error()
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(reasons) => AppError::Validation(reasons),
            AuthError::Authentication => AppError::Unauthorized,
            AuthError::Authorization(msg) => AppError::Forbidden(msg),
            AuthError::Conflict(msg) => AppError::Conflict(msg),
            AuthError::NotFound(msg) => AppError::NotFound(msg),
            AuthError::Transient(msg) => AppError::Unavailable(msg),
            AuthError::Unsupported(msg) => AppError::NotImplemented(msg),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(vec![rejection.body_text()])
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_statuses() {
        let cases = [
            (AuthError::validation("weak"), StatusCode::BAD_REQUEST),
            (AuthError::Authentication, StatusCode::UNAUTHORIZED),
            (AuthError::Authorization("x".into()), StatusCode::FORBIDDEN),
            (AuthError::Conflict("x".into()), StatusCode::CONFLICT),
            (AuthError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AuthError::Transient("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AuthError::Unsupported("x".into()), StatusCode::NOT_IMPLEMENTED),
            (AuthError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = AppError::Internal("connection string postgres://secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("INTERNAL_ERROR"));
        assert!(!text.contains("postgres"));
    }

    #[tokio::test]
    async fn test_validation_lists_details() {
        let response = AppError::Validation(vec!["a".into(), "b".into()]).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["details"].as_array().unwrap().len(), 2);
    }
}
