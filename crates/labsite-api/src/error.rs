//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Current password is incorrect")]
    InvalidOldPassword,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredToken,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] labsite_db::DbError),

    #[error("Auth error: {0}")]
    Auth(#[from] labsite_auth::AuthError),
}

const SERVER_ERROR_MESSAGE: &str = "Internal server error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password".to_string(),
            ),
            ApiError::DuplicateEmail => (
                StatusCode::CONFLICT,
                "DUPLICATE_EMAIL",
                "An account with this email already exists".to_string(),
            ),
            ApiError::InvalidOldPassword => (
                StatusCode::BAD_REQUEST,
                "INVALID_OLD_PASSWORD",
                "Current password is incorrect".to_string(),
            ),
            ApiError::InvalidOrExpiredToken => (
                StatusCode::BAD_REQUEST,
                "INVALID_OR_EXPIRED_TOKEN",
                "Password reset link is invalid or has expired".to_string(),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Not authorized, please log in again".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "You do not have permission to perform this action".to_string(),
            ),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Database(labsite_db::DbError::Duplicate(_)) => {
                return ApiError::DuplicateEmail.into_response();
            }
            ApiError::Database(labsite_db::DbError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
            }
            ApiError::Auth(e) if e.is_client_error() => {
                let status = match e {
                    labsite_auth::AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
                    _ => StatusCode::UNAUTHORIZED,
                };
                let code = if status == StatusCode::FORBIDDEN {
                    "FORBIDDEN"
                } else {
                    "UNAUTHORIZED"
                };
                (status, code, e.to_string())
            }
            ApiError::Internal(_) | ApiError::Database(_) | ApiError::Auth(_) => {
                error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERVER_ERROR",
                    SERVER_ERROR_MESSAGE.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ApiError::DuplicateEmail, StatusCode::CONFLICT),
            (ApiError::InvalidOldPassword, StatusCode::BAD_REQUEST),
            (ApiError::InvalidOrExpiredToken, StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::Forbidden, StatusCode::FORBIDDEN),
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                ApiError::Database(labsite_db::DbError::Duplicate("a@x.com".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Auth(labsite_auth::AuthError::InsufficientPermissions),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Auth(labsite_auth::AuthError::PasswordHash("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_details_not_leaked() {
        use http_body_util::BodyExt;

        let response =
            ApiError::Internal("sqlite disk I/O error at /var/db".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "SERVER_ERROR");
        assert_eq!(body["message"], SERVER_ERROR_MESSAGE);
    }
}
