//! API routes

pub mod auth;
mod extract;
mod health;
pub mod metrics;
pub mod types;
pub mod users;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

pub use auth::{MaybeAuth, RequireAuth};

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let mut router = Router::new()
        .merge(health::routes())
        .merge(auth::routes(&state))
        .merge(users::routes(&state))
        .with_state(state)
        // Account payloads are small JSON documents
        .layer(DefaultBodyLimit::max(64 * 1024));

    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle));
    }

    router
}
