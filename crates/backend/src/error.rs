//! Unified error handling for the backend API.
//!
//! Handlers return [`ApiResult`] and use `?` on auth, store and repository
//! errors; the conversions below decide which status each failure maps to.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::{AuthError, GuardError};
use crate::repository::RepoError;
use crate::store::StoreError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Database connection pool error
    #[error("Database connection error")]
    ConnectionPool(#[source] diesel_async::pooled_connection::deadpool::PoolError),

    /// Database query error
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Session store unreachable or misbehaving
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unique constraint hit, e.g. a taken username
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Authentication required but not provided or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted to access resource
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for ApiError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        ApiError::ConnectionPool(err)
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Pool(e) => ApiError::ConnectionPool(e),
            RepoError::Database(e) => ApiError::Database(e),
            RepoError::Conflict(what) => ApiError::Conflict(what),
            RepoError::InvalidRow(reason) => {
                ApiError::Internal(anyhow::anyhow!("invalid row: {}", reason))
            }
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Unavailable(e) => ApiError::Store(e),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidEmail(reason) => ApiError::BadRequest(reason),
            AuthError::Store(e) => ApiError::Store(e),
            AuthError::InvalidToken | AuthError::TokenMismatch | AuthError::Unauthorized => {
                ApiError::Unauthorized("Invalid token".to_string())
            }
            AuthError::ExpiredToken => ApiError::Unauthorized("Session expired".to_string()),
            AuthError::Signing(reason) => {
                ApiError::Internal(anyhow::anyhow!("token signing failed: {}", reason))
            }
            AuthError::DeliveryFailed(e) => ApiError::Internal(e.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::ConnectionPool(e) => {
                tracing::error!("Connection pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Database connection unavailable".to_string(),
                    None,
                )
            }
            ApiError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                match e {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        "Resource not found".to_string(),
                        None,
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Database operation failed".to_string(),
                        None,
                    ),
                }
            }
            ApiError::Store(e) => {
                tracing::error!("Session store error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Session store unavailable".to_string(),
                    None,
                )
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                format!("{} not found", resource),
                None,
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_errors_map_to_401_with_their_message() {
        let err = ApiError::from(GuardError::SessionExpired);
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Session expired"));
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);

        let err = ApiError::from(GuardError::Unauthenticated);
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Not authenticated"));
    }

    #[test]
    fn store_outage_is_503_not_401() {
        let err = ApiError::from(GuardError::Unavailable(StoreError::Backend(
            "connection refused".to_string(),
        )));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn auth_error_statuses() {
        let cases = [
            (AuthError::InvalidEmail("bad".into()), StatusCode::BAD_REQUEST),
            (AuthError::TokenMismatch, StatusCode::UNAUTHORIZED),
            (AuthError::ExpiredToken, StatusCode::UNAUTHORIZED),
            (AuthError::Signing("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn conflict_is_409() {
        let err = ApiError::from(RepoError::Conflict("Username already taken".into()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
