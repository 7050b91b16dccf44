//! User account routes
//!
//! Self-service profile editing for any signed-in user, a public member
//! directory, and account administration for admins.

use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, put},
};
use chrono::Utc;
use labsite_auth::{AuthContext, hash_password, optional_auth, require_admin, require_auth};
use labsite_db::{NewUser, Profile, ProfileUpdate, UserRole, extended_expiration};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

use super::auth::{MaybeAuth, RequireAuth, normalize_email, validate_email, validate_password};
use super::extract::{ApiJson, ApiPath};
use super::types::{
    ArchiveRequest, CreateUserRequest, DirectoryEntry, UpdateProfileRequest, UpdateRoleRequest,
    UserResponse,
};

/// Maximum length of single-line profile fields
const MAX_FIELD_LENGTH: usize = 200;
/// Maximum length of the biography
const MAX_BIOGRAPHY_LENGTH: usize = 5000;
/// Maximum number of entries in a list field
const MAX_LIST_ENTRIES: usize = 50;

fn parse_role(role: &str) -> Result<UserRole, ApiError> {
    role.parse::<UserRole>()
        .map_err(|_| ApiError::Validation(format!("Invalid role: {}", role)))
}

/// Validate a profile patch before it reaches the database
fn validate_profile(update: &UpdateProfileRequest) -> Result<(), ApiError> {
    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Name cannot be empty".to_string()));
        }
    }
    let single_line = [
        ("name", &update.name),
        ("position", &update.position),
        ("phone", &update.phone),
        ("image", &update.image),
        ("orcid", &update.orcid),
    ];
    for (field, value) in single_line {
        if value.as_ref().is_some_and(|v| v.len() > MAX_FIELD_LENGTH) {
            return Err(ApiError::Validation(format!(
                "{} exceeds maximum length of {} characters",
                field, MAX_FIELD_LENGTH
            )));
        }
    }
    if update
        .biography
        .as_ref()
        .is_some_and(|b| b.len() > MAX_BIOGRAPHY_LENGTH)
    {
        return Err(ApiError::Validation(format!(
            "biography exceeds maximum length of {} characters",
            MAX_BIOGRAPHY_LENGTH
        )));
    }
    let lists = [
        ("expertise", &update.expertise),
        ("researchInterests", &update.research_interests),
        ("education", &update.education),
    ];
    for (field, value) in lists {
        if let Some(items) = value {
            if items.len() > MAX_LIST_ENTRIES
                || items.iter().any(|i| i.len() > MAX_FIELD_LENGTH)
            {
                return Err(ApiError::Validation(format!(
                    "{} accepts at most {} entries of {} characters",
                    field, MAX_LIST_ENTRIES, MAX_FIELD_LENGTH
                )));
            }
        }
    }
    Ok(())
}

/// Drop blank list entries and surrounding whitespace
fn tidy_list(items: Option<Vec<String>>) -> Option<Vec<String>> {
    items.map(|items| {
        items
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect()
    })
}

// ==================== Profile Routes ====================

/// PUT /api/users/me/profile
async fn update_my_profile(
    RequireAuth(auth): RequireAuth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    validate_profile(&request)?;

    let mut update = ProfileUpdate::from(request);
    update.name = update.name.map(|n| n.trim().to_string());
    update.expertise = tidy_list(update.expertise);
    update.research_interests = tidy_list(update.research_interests);
    update.education = tidy_list(update.education);

    let user = state
        .db
        .update_profile(auth.id, update, extended_expiration(Utc::now()))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    info!("User {} updated their profile", user.email);
    Ok(Json(UserResponse::from(&user)))
}

/// GET /api/users/directory
///
/// Public; signed-in viewers also get contact details.
async fn directory(
    MaybeAuth(viewer): MaybeAuth,
    State(state): State<AppState>,
) -> Result<Json<Vec<DirectoryEntry>>, ApiError> {
    let with_contact = viewer.is_some();
    let users = state.db.list_users(false).await?;

    Ok(Json(
        users
            .into_iter()
            .map(|u| DirectoryEntry::new(u, with_contact))
            .collect(),
    ))
}

// ==================== Admin Routes ====================

/// GET /api/users (Admin only)
async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.db.list_users(true).await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

/// POST /api/users (Admin only)
///
/// Provisioned accounts must set their own password on first login.
async fn create_user(
    RequireAuth(admin): RequireAuth,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let email = normalize_email(&request.email);
    validate_email(&email)?;
    validate_password(&request.password)?;
    let role = parse_role(&request.role)?;
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("Name cannot be empty".to_string()));
    }

    debug!("Admin {} provisioning {}", admin.email, email);

    let password_hash = hash_password(&request.password)?;
    let user = state
        .db
        .insert_user(NewUser {
            email,
            password_hash,
            role,
            name,
            must_change_password: true,
            profile: Profile::default(),
        })
        .await?;

    info!("Created {} account {}", user.role, user.email);
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// PUT /api/users/{id}/role (Admin only)
async fn update_role(
    RequireAuth(admin): RequireAuth,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let role = parse_role(&request.role)?;
    if id == admin.id && role != UserRole::Admin {
        return Err(ApiError::Validation("You cannot remove your own admin role".to_string()));
    }

    if !state.db.update_user_role(id, role).await? {
        return Err(ApiError::NotFound(format!("User: {}", id)));
    }

    let user = state
        .db
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User: {}", id)))?;

    info!("Admin {} set role of {} to {}", admin.email, user.email, role);
    Ok(Json(UserResponse::from(&user)))
}

/// PUT /api/users/{id}/archive (Admin only)
async fn set_archived(
    RequireAuth(admin): RequireAuth,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ArchiveRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if id == admin.id && request.archived {
        return Err(ApiError::Validation("You cannot archive your own account".to_string()));
    }

    if !state.db.set_user_archived(id, request.archived).await? {
        return Err(ApiError::NotFound(format!("User: {}", id)));
    }

    let user = state
        .db
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User: {}", id)))?;

    info!(
        "Admin {} {} account {}",
        admin.email,
        if request.archived { "archived" } else { "restored" },
        user.email
    );
    Ok(Json(UserResponse::from(&user)))
}

/// Create user routes
pub fn routes(state: &AppState) -> Router<AppState> {
    let auth_context = AuthContext::from_ref(state);

    let public = Router::new()
        .route("/api/users/directory", get(directory))
        .route_layer(from_fn_with_state(auth_context.clone(), optional_auth));

    let signed_in = Router::new()
        .route("/api/users/me/profile", put(update_my_profile))
        .route_layer(from_fn_with_state(auth_context.clone(), require_auth));

    let admin = Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}/role", put(update_role))
        .route("/api/users/{id}/archive", put(set_archived))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(auth_context, require_auth));

    public.merge(signed_in).merge(admin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("admin").unwrap(), UserRole::Admin);
        assert!(matches!(parse_role("superuser"), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_validate_profile_limits() {
        assert!(validate_profile(&UpdateProfileRequest::default()).is_ok());

        let blank_name = UpdateProfileRequest {
            name: Some("   ".into()),
            ..Default::default()
        };
        assert!(validate_profile(&blank_name).is_err());

        let long_bio = UpdateProfileRequest {
            biography: Some("x".repeat(MAX_BIOGRAPHY_LENGTH + 1)),
            ..Default::default()
        };
        assert!(validate_profile(&long_bio).is_err());

        let many = UpdateProfileRequest {
            expertise: Some(vec!["topic".to_string(); MAX_LIST_ENTRIES + 1]),
            ..Default::default()
        };
        assert!(validate_profile(&many).is_err());
    }

    #[test]
    fn test_tidy_list() {
        let tidied = tidy_list(Some(vec![
            " optics ".into(),
            "".into(),
            "  ".into(),
            "lasers".into(),
        ]));
        assert_eq!(tidied, Some(vec!["optics".to_string(), "lasers".to_string()]));
        assert_eq!(tidy_list(None), None);
    }
}
