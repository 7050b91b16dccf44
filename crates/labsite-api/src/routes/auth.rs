//! Authentication extractors and routes
//!
//! Password lifecycle of an account:
//! `NeedsInitialPassword` (must_change_password) -> `Active`, and
//! `Active` -> reset requested -> `Active` again once the emailed token is
//! consumed.

use axum::{
    Json, Router,
    extract::{FromRef, FromRequestParts, State},
    http::{StatusCode, request::Parts},
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use chrono::Utc;
use labsite_auth::{
    AuthContext, AuthUser, ResetToken, TokenSubject, digest_reset_token, hash_password,
    require_auth, verify_password,
};
use labsite_db::{AccountState, NewUser, Profile, User, UserRole, extended_expiration};
use std::convert::Infallible;
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

use super::extract::{ApiJson, ApiPath};
use super::types::{
    AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, InitialPasswordSetupRequest,
    LoginRequest, MessageResponse, RegisterRequest, ResetPasswordRequest, UserResponse,
    UsersExistResponse,
};

// ==================== Auth Extractors ====================

/// Extractor for the user attached by `require_auth`
pub struct RequireAuth(pub AuthUser);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(RequireAuth)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Extractor for the user attached by `optional_auth`, if any
pub struct MaybeAuth(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuth(parts.extensions.get::<AuthUser>().cloned()))
    }
}

// ==================== Input Validation ====================

/// Maximum allowed email length
const MAX_EMAIL_LENGTH: usize = 254;
/// Maximum allowed password length (prevent DoS with very large passwords)
const MAX_PASSWORD_LENGTH: usize = 256;

/// Response to every forgot-password request, whether or not the account exists
pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";

/// Canonical form emails are stored and looked up in
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate a normalized email address
pub(crate) fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ApiError::Validation(format!(
            "Email exceeds maximum length of {} characters",
            MAX_EMAIL_LENGTH
        )));
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::Validation("Please provide a valid email address".to_string()));
    }
    Ok(())
}

/// Validate password length
pub(crate) fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password exceeds maximum length of {} characters",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Display name for accounts registered without one
fn default_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

// ==================== Helpers ====================

/// Hash verified when the login email is unknown, so both paths do the same work
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("labsite-timing-equalizer").unwrap_or_default());

/// Issue a token for `user` and bundle it with the sanitized user
fn session_response(
    state: &AppState,
    user: &User,
    message: Option<&str>,
) -> Result<AuthResponse, ApiError> {
    let token = state.jwt.issue(&TokenSubject::from(user))?;
    Ok(AuthResponse {
        message: message.map(str::to_string),
        token,
        expires_in: state.jwt.token_ttl().num_seconds(),
        user: UserResponse::from(user),
    })
}

/// Reload a user after a write; a vanished row means the session is gone
async fn reload_user(state: &AppState, id: i64) -> Result<User, ApiError> {
    state
        .db
        .get_user_by_id(id)
        .await?
        .filter(|u| !u.is_archived)
        .ok_or(ApiError::Unauthorized)
}

/// Store a fresh reset token for `user` and mail the link
///
/// The token is withdrawn again when the mail cannot be sent.
async fn send_reset_link(state: &AppState, user: &User) -> Result<(), ApiError> {
    let reset = ResetToken::issue(state.settings.reset_token_ttl);
    state
        .db
        .set_reset_token(user.id, &reset.digest, reset.expires_at)
        .await?;

    let link = state.settings.reset_link(&reset.token);
    if let Err(e) = state.mailer.send_password_reset(&user.email, &link).await {
        state.db.clear_reset_token(user.id).await?;
        return Err(ApiError::Internal(format!("reset email not sent: {}", e)));
    }

    metrics::counter!("labsite_auth_password_resets_total", "stage" => "requested").increment(1);
    info!("Password reset link sent to {}", user.email);
    Ok(())
}

// ==================== Auth Routes ====================

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if email.is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation("Email and password are required".to_string()));
    }
    if request.password.len() > MAX_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password exceeds maximum length of {} characters",
            MAX_PASSWORD_LENGTH
        )));
    }

    debug!("Login attempt for {}", email);

    // Verify against a dummy hash when the user doesn't exist
    let user_result = state.db.get_user_by_email(&email).await?;
    let (hash_to_verify, user) = match user_result {
        Some(u) => (u.password_hash.clone(), Some(u)),
        None => (DUMMY_HASH.clone(), None),
    };

    let password_valid = verify_password(&request.password, &hash_to_verify);

    let user = match (user, password_valid) {
        (Some(u), true) if !u.is_archived => u,
        _ => {
            metrics::counter!("labsite_auth_logins_total", "outcome" => "failure").increment(1);
            warn!("Failed login for {}", email);
            return Err(ApiError::InvalidCredentials);
        }
    };

    let response = session_response(&state, &user, None)?;
    metrics::counter!("labsite_auth_logins_total", "outcome" => "success").increment(1);
    info!("User {} logged in", user.email);

    Ok(Json(response))
}

/// POST /api/auth/register
async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = normalize_email(&request.email);
    validate_email(&email)?;
    validate_password(&request.password)?;

    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name(&email));

    let password_hash = hash_password(&request.password)?;
    let user = state
        .db
        .insert_user(NewUser {
            email,
            password_hash,
            role: UserRole::Member,
            name,
            must_change_password: true,
            profile: Profile::default(),
        })
        .await?;

    info!("Registered member {}", user.email);

    let response = session_response(&state, &user, None)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/initial-signup
///
/// Creates the first administrator; refused once any account exists.
async fn initial_signup(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = normalize_email(&request.email);
    validate_email(&email)?;
    validate_password(&request.password)?;

    if state.db.has_users().await? {
        warn!("Initial signup attempted for {} but users already exist", email);
        return Err(ApiError::Forbidden);
    }

    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name(&email));

    let password_hash = hash_password(&request.password)?;
    let user = state
        .db
        .insert_first_user(NewUser {
            email,
            password_hash,
            role: UserRole::Admin,
            name,
            must_change_password: false,
            profile: Profile::default(),
        })
        .await?
        .ok_or(ApiError::Forbidden)?;

    info!("Bootstrap administrator {} created", user.email);

    let response = session_response(&state, &user, None)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/auth/check-users-exist
async fn check_users_exist(
    State(state): State<AppState>,
) -> Result<Json<UsersExistResponse>, ApiError> {
    let users_exist = state.db.has_users().await?;
    Ok(Json(UsersExistResponse { users_exist }))
}

/// GET /api/auth/me
async fn me(
    RequireAuth(auth): RequireAuth,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = reload_user(&state, auth.id).await?;
    Ok(Json(UserResponse::from(&user)))
}

/// PUT /api/auth/change-password
async fn change_password(
    RequireAuth(auth): RequireAuth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChangePasswordRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    validate_password(&request.new_password)?;

    let user = reload_user(&state, auth.id).await?;
    if !verify_password(&request.current_password, &user.password_hash) {
        warn!("Password change for {} rejected: wrong current password", user.email);
        return Err(ApiError::InvalidOldPassword);
    }

    let password_hash = hash_password(&request.new_password)?;
    state
        .db
        .update_password(user.id, &password_hash, extended_expiration(Utc::now()))
        .await?;

    let user = reload_user(&state, user.id).await?;
    info!("User {} changed their password", user.email);

    Ok(Json(session_response(&state, &user, Some("Password changed successfully"))?))
}

/// PUT /api/auth/initial-password-setup
async fn initial_password_setup(
    RequireAuth(auth): RequireAuth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<InitialPasswordSetupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = reload_user(&state, auth.id).await?;
    if AccountState::of(&user, Utc::now()) != AccountState::NeedsInitialPassword {
        return Err(ApiError::Validation(
            "Initial password setup has already been completed".to_string(),
        ));
    }

    let expiration = extended_expiration(Utc::now());
    let message = if request.keep_current {
        state.db.clear_must_change_password(user.id, expiration).await?;
        "Current password kept"
    } else if let Some(new_password) = request.new_password.as_deref() {
        validate_password(new_password)?;
        let password_hash = hash_password(new_password)?;
        state.db.update_password(user.id, &password_hash, expiration).await?;
        "Password set successfully"
    } else {
        return Err(ApiError::Validation(
            "Provide a new password or choose to keep the current one".to_string(),
        ));
    };

    let user = reload_user(&state, user.id).await?;
    info!("User {} completed initial password setup", user.email);

    Ok(Json(session_response(&state, &user, Some(message))?))
}

/// POST /api/auth/forgot-password
///
/// The response never reveals whether the account exists.
async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".to_string()));
    }

    match state.db.get_user_by_email(&email).await? {
        Some(user) if !user.is_archived => {
            // Failures past this point must not change the response
            if let Err(e) = send_reset_link(&state, &user).await {
                error!("Password reset for {} failed: {}", user.email, e);
            }
        }
        _ => debug!("Password reset requested for unknown or archived account"),
    }

    Ok(Json(MessageResponse {
        message: FORGOT_PASSWORD_MESSAGE.to_string(),
    }))
}

/// POST /api/auth/reset-password/{token}
async fn reset_password(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    validate_password(&request.password)?;

    let digest = digest_reset_token(&token);
    let now = Utc::now();
    let user = state
        .db
        .get_user_by_reset_token(&digest)
        .await?
        .filter(|u| !u.is_archived && u.has_pending_reset(now))
        .ok_or(ApiError::InvalidOrExpiredToken)?;

    let password_hash = hash_password(&request.password)?;
    let consumed = state
        .db
        .consume_reset_token(user.id, &digest, &password_hash, extended_expiration(now))
        .await?;
    if !consumed {
        return Err(ApiError::InvalidOrExpiredToken);
    }

    let user = reload_user(&state, user.id).await?;
    metrics::counter!("labsite_auth_password_resets_total", "stage" => "completed").increment(1);
    info!("User {} reset their password", user.email);

    Ok(Json(session_response(&state, &user, Some("Password reset successful"))?))
}

/// Create auth routes
pub fn routes(state: &AppState) -> Router<AppState> {
    let auth_context = AuthContext::from_ref(state);

    let public = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/initial-signup", post(initial_signup))
        .route("/api/auth/check-users-exist", get(check_users_exist))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/reset-password/{token}", post(reset_password));

    let protected = Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/change-password", put(change_password))
        .route("/api/auth/initial-password-setup", put(initial_password_setup))
        .route_layer(from_fn_with_state(auth_context, require_auth));

    public.merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Lab.Example "), "ada@lab.example");
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(validate_email("first.last@dept.uni.edu").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@x.com").is_err());
        assert!(validate_email("a@localhost").is_err());
        assert!(validate_email("a@b@c.com").is_err());
        assert!(validate_email("a b@x.com").is_err());
        assert!(validate_email(&format!("{}@x.com", "a".repeat(260))).is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("pw1").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password(&"x".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name("marie.curie@lab.example"), "marie.curie");
    }
}
