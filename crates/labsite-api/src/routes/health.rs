//! Health check endpoints

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tracing::error;

use crate::state::AppState;

/// Health status response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether the account store answered
    pub database: bool,
    /// Whether the first administrator still has to be created
    pub needs_initial_signup: Option<bool>,
}

/// Health check handler; 503 when the account store is unreachable
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    metrics::counter!("labsite_health_checks_total").increment(1);

    let (status, body) = match state.db.has_users().await {
        Ok(users_exist) => (
            StatusCode::OK,
            HealthResponse {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                database: true,
                needs_initial_signup: Some(!users_exist),
            },
        ),
        Err(e) => {
            error!("Health check could not reach the account store: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthResponse {
                    status: "unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    database: false,
                    needs_initial_signup: None,
                },
            )
        }
    };

    (status, Json(body))
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}
