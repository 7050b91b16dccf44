//! Application state

use axum::extract::FromRef;
use chrono::Duration;
use labsite_auth::{AuthContext, JwtManager};
use labsite_db::Database;
use std::sync::Arc;
use url::Url;

use crate::mail::Mailer;

/// Prometheus render handle served at `/metrics`
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Password-reset settings
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// How long an emailed reset link stays usable
    pub reset_token_ttl: Duration,
    /// Frontend page the token is appended to
    reset_url_base: Url,
}

impl AuthSettings {
    pub fn new(reset_token_ttl: Duration, reset_url_base: &str) -> Result<Self, url::ParseError> {
        let reset_url_base = Url::parse(reset_url_base)?;
        if reset_url_base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }
        Ok(Self {
            reset_token_ttl,
            reset_url_base,
        })
    }

    /// Link embedding `token` as the last path segment
    pub fn reset_link(&self, token: &str) -> String {
        let mut url = self.reset_url_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(token);
        }
        url.to_string()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jwt: Arc<JwtManager>,
    pub mailer: Arc<dyn Mailer>,
    pub settings: Arc<AuthSettings>,
}

impl AppState {
    pub fn new(
        db: Database,
        jwt: Arc<JwtManager>,
        mailer: Arc<dyn Mailer>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            db,
            jwt,
            mailer,
            settings: Arc::new(settings),
        }
    }
}

impl FromRef<AppState> for AuthContext {
    fn from_ref(state: &AppState) -> Self {
        AuthContext::new(state.db.clone(), state.jwt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_link_appends_token() {
        let settings =
            AuthSettings::new(Duration::hours(1), "https://lab.example/reset-password").unwrap();
        assert_eq!(
            settings.reset_link("abc123"),
            "https://lab.example/reset-password/abc123"
        );

        let trailing =
            AuthSettings::new(Duration::hours(1), "https://lab.example/reset-password/").unwrap();
        assert_eq!(
            trailing.reset_link("abc123"),
            "https://lab.example/reset-password/abc123"
        );
    }

    #[test]
    fn test_reset_base_must_be_absolute() {
        assert!(AuthSettings::new(Duration::hours(1), "/reset-password").is_err());
        assert!(AuthSettings::new(Duration::hours(1), "mailto:lab@example.org").is_err());
    }
}
