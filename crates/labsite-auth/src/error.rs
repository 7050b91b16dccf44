//! Authentication error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use labsite_db::DbError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing authorization header")]
    MissingAuthHeader,

    #[error("Invalid authorization header format")]
    InvalidAuthHeader,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("User not found")]
    UserNotFound,

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token signing error: {0}")]
    TokenIssue(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl AuthError {
    /// Whether the caller's credential, rather than the server, is at fault
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            AuthError::PasswordHash(_) | AuthError::TokenIssue(_) | AuthError::Database(_)
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::InvalidToken
            | AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::UserNotFound => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Not authorized, please log in again",
            ),
            AuthError::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "You do not have permission to perform this action",
            ),
            AuthError::PasswordHash(_) | AuthError::TokenIssue(_) | AuthError::Database(_) => {
                error!("Authentication failed internally: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERVER_ERROR",
                    "Internal server error",
                )
            }
        };

        let body = axum::Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
