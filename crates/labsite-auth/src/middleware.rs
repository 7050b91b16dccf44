//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use labsite_db::{Database, User, UserRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::jwt::JwtManager;

/// Authenticated user information, without credential fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub role: UserRole,
    pub name: String,
    pub must_change_password: bool,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
            must_change_password: user.must_change_password,
        }
    }
}

/// State the middleware needs to resolve a token into a user
#[derive(Clone)]
pub struct AuthContext {
    pub db: Database,
    pub jwt: Arc<JwtManager>,
}

impl AuthContext {
    pub fn new(db: Database, jwt: Arc<JwtManager>) -> Self {
        Self { db, jwt }
    }

    /// Verify the bearer token in `headers` and load its user
    ///
    /// Archived accounts are treated as missing.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = extract_bearer_token(header)?;
        let claims = self.jwt.verify(token)?;

        let user = self
            .db
            .get_user_by_id(claims.id)
            .await?
            .filter(|u| !u.is_archived)
            .ok_or(AuthError::UserNotFound)?;

        Ok(AuthUser::from(&user))
    }
}

/// Extract bearer token from authorization header
pub fn extract_bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Authentication middleware
///
/// Rejects the request unless it carries a valid bearer token for an
/// existing user; the resolved `AuthUser` is added to request extensions.
pub async fn require_auth(
    State(ctx): State<AuthContext>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = ctx.authenticate(request.headers()).await.inspect_err(|e| {
        if e.is_client_error() {
            debug!("Rejected request to {}: {}", request.uri().path(), e);
        }
    })?;

    debug!("Authenticated user: {} ({})", user.email, user.role);

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Optional authentication middleware
///
/// Attaches an `AuthUser` when the request carries a usable token and
/// otherwise lets it through untouched.
pub async fn optional_auth(
    State(ctx): State<AuthContext>,
    mut request: Request,
    next: Next,
) -> Response {
    match ctx.authenticate(request.headers()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
        }
        Err(AuthError::MissingAuthHeader) => {}
        Err(e) if e.is_client_error() => debug!("Ignoring unusable credentials: {}", e),
        Err(e) => warn!("Optional authentication failed: {}", e),
    }
    next.run(request).await
}

/// Role gate; must run after `require_auth`
pub async fn authorize_roles(
    allowed: &[UserRole],
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuthHeader)?;

    if !allowed.contains(&user.role) {
        debug!("User {} with role {} denied", user.email, user.role);
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Middleware to require admin role
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AuthError> {
    authorize_roles(&[UserRole::Admin], request, next).await
}
