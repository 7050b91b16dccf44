//! Labsite client
//!
//! Client-side half of the account system: the session store that keeps the
//! signed-in user, durable token storage, and an HTTP client for the auth API.

pub mod api;
pub mod error;
pub mod generation;
pub mod session;
pub mod storage;
pub mod types;

pub use api::ApiClient;
pub use error::ClientError;
pub use generation::{RequestGenerations, RequestTicket};
pub use session::{SessionClaims, SessionStore, TOKEN_STORAGE_KEY};
pub use storage::{FileStorage, MemoryStorage, TokenStorage};
pub use types::{ProfileChanges, SessionUser, UserRole};
