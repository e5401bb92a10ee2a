//! Application error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {0} has already ended")]
    AlreadyEnded(uuid::Uuid),

    #[error("Session {0} is not active")]
    SessionNotActive(uuid::Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Db(_) => "database",
            AppError::Serialization(_) | AppError::Validation(_) => "validation",
            AppError::Unauthorized(_) | AppError::Jwt(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyEnded(_) => "already_ended",
            AppError::SessionNotActive(_) => "session_not_active",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Db(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Serialization(_)
            | AppError::Validation(_)
            | AppError::AlreadyEnded(_)
            | AppError::SessionNotActive(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Config(msg)
            | AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Jwt(msg) => msg.clone(),
            AppError::Serialization(e) => format!("Invalid payload: {}", e),
            AppError::AlreadyEnded(_) | AppError::SessionNotActive(_) => self.to_string(),
            AppError::Db(e) => {
                tracing::error!(error = %e, "database error");
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "Internal error".to_string()
            }
        };

        let body = Json(json!({ "error": message, "code": self.code() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn state_conflicts_are_bad_requests() {
        assert_eq!(
            AppError::AlreadyEnded(Uuid::nil()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::SessionNotActive(Uuid::nil()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn identity_errors_map_to_401_and_403() {
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Conflict("x".into()).into_response().status(),
            StatusCode::CONFLICT
        );
    }
}
