//! Labsite REST API
//!
//! This crate provides the Axum-based HTTP API for the lab site: login,
//! registration, the password lifecycle and the account endpoints of the
//! admin dashboard.

pub mod error;
pub mod mail;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use mail::{HttpRelayMailer, LogMailer, MailError, Mailer};
pub use routes::create_router;
pub use state::{AppState, AuthSettings, MetricsHandle};
