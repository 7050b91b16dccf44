//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned error: {status} {code} - {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Request superseded by a newer one")]
    Superseded,

    #[error("Malformed session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Storage I/O error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Storage format error: {0}")]
    StorageFormat(#[from] serde_json::Error),
}

impl ClientError {
    /// Error code reported by the server, if this is an API error
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}
