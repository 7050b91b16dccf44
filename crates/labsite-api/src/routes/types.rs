//! Request/Response DTOs

use labsite_db::{ProfileUpdate, User, UserRole};
use serde::{Deserialize, Serialize};

// ==================== Auth Types ====================

/// Login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration and first-admin signup request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Change password request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(alias = "oldPassword")]
    pub current_password: String,
    pub new_password: String,
}

/// Initial password setup request
///
/// Either `newPassword` is given or `keepCurrent` is true.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPasswordSetupRequest {
    #[serde(default)]
    pub new_password: Option<String>,
    #[serde(default)]
    pub keep_current: bool,
}

/// Forgot password request
#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Reset password request; the token travels in the path
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Token plus the authoritative user snapshot
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub token: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

/// Plain message response
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Bootstrap gate response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersExistResponse {
    pub users_exist: bool,
}

// ==================== User Types ====================

/// User response (without password or reset fields)
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub role: UserRole,
    pub name: String,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub image: Option<String>,
    pub orcid: Option<String>,
    pub biography: Option<String>,
    pub expertise: Vec<String>,
    pub research_interests: Vec<String>,
    pub education: Vec<String>,
    pub must_change_password: bool,
    pub expiration_date: String,
    pub is_archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
            position: user.position.clone(),
            phone: user.phone.clone(),
            image: user.image.clone(),
            orcid: user.orcid.clone(),
            biography: user.biography.clone(),
            expertise: user.expertise.clone(),
            research_interests: user.research_interests.clone(),
            education: user.education.clone(),
            must_change_password: user.must_change_password,
            expiration_date: user.expiration_date.to_rfc3339(),
            is_archived: user.is_archived,
            created_at: user.created_at.to_rfc3339(),
            updated_at: user.updated_at.to_rfc3339(),
        }
    }
}

/// Public directory entry; contact details only for signed-in viewers
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: i64,
    pub name: String,
    pub role: UserRole,
    pub position: Option<String>,
    pub image: Option<String>,
    pub orcid: Option<String>,
    pub biography: Option<String>,
    pub expertise: Vec<String>,
    pub research_interests: Vec<String>,
    pub education: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl DirectoryEntry {
    pub fn new(user: User, with_contact: bool) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            position: user.position,
            image: user.image,
            orcid: user.orcid,
            biography: user.biography,
            expertise: user.expertise,
            research_interests: user.research_interests,
            education: user.education,
            email: with_contact.then_some(user.email),
            phone: if with_contact { user.phone } else { None },
        }
    }
}

/// Self-service profile update
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub image: Option<String>,
    pub orcid: Option<String>,
    pub biography: Option<String>,
    pub expertise: Option<Vec<String>>,
    pub research_interests: Option<Vec<String>>,
    pub education: Option<Vec<String>>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(request: UpdateProfileRequest) -> Self {
        Self {
            name: request.name,
            position: request.position,
            phone: request.phone,
            image: request.image,
            orcid: request.orcid,
            biography: request.biography,
            expertise: request.expertise,
            research_interests: request.research_interests,
            education: request.education,
        }
    }
}

/// Admin account provisioning request
#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: String,
}

/// Role change request
#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// Archive toggle request
#[derive(Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}
