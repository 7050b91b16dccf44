//! Labsite Authentication and Authorization
//!
//! This crate provides password hashing, JWT session tokens, password-reset
//! tokens and the axum middleware that turns a bearer token into an
//! authenticated user with a role.

pub mod error;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod reset;

pub use error::AuthError;
pub use jwt::{Claims, JwtManager, TokenSubject};
pub use middleware::{
    AuthContext, AuthUser, authorize_roles, extract_bearer_token, optional_auth, require_admin,
    require_auth,
};
pub use password::{hash_password, verify_password};
pub use reset::{ResetToken, digest_reset_token, generate_reset_token};
