//! JWT session tokens

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use labsite_db::{User, UserRole};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User ID
    pub id: i64,
    pub email: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub must_change_password: bool,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Identity a token is issued for
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub id: i64,
    pub email: &'a str,
    pub role: UserRole,
    pub name: Option<&'a str>,
    pub must_change_password: bool,
}

impl<'a> From<&'a User> for TokenSubject<'a> {
    fn from(user: &'a User) -> Self {
        Self {
            id: user.id,
            email: &user.email,
            role: user.role,
            name: Some(user.name.as_str()).filter(|n| !n.is_empty()),
            must_change_password: user.must_change_password,
        }
    }
}

/// JWT manager for token generation and validation
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    /// Lifetime of issued tokens
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Issue a token with the configured lifetime
    pub fn issue(&self, subject: &TokenSubject<'_>) -> Result<String, AuthError> {
        self.issue_with_ttl(subject, self.token_ttl)
    }

    /// Issue a token expiring `ttl` from now
    pub fn issue_with_ttl(
        &self,
        subject: &TokenSubject<'_>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            id: subject.id,
            email: subject.email.to_string(),
            role: subject.role,
            name: subject.name.map(str::to_string),
            must_change_password: subject.must_change_password,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        debug!("Issuing token for user {} ({})", subject.id, subject.role);

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenIssue(e.to_string()))
    }

    /// Validate a token and return its claims
    ///
    /// Signature mismatch, malformed payload and `now >= exp` all fail with
    /// `InvalidToken`.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!("Token rejected: {}", e);
            AuthError::InvalidToken
        })?;

        if token_data.claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::InvalidToken);
        }

        Ok(token_data.claims)
    }
}
