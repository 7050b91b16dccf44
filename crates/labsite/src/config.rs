//! Configuration loading and management

use anyhow::{Context, Result, bail};
use labsite_db::PoolSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// 0 keeps idle connections open forever
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Minimum reset link lifetime
const MIN_RESET_TOKEN_TTL_MINUTES: i64 = 5;

/// Maximum reset link lifetime (one day)
const MAX_RESET_TOKEN_TTL_MINUTES: i64 = 24 * 60;

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_reset_token_ttl_minutes")]
    pub reset_token_ttl_minutes: i64,
}

impl AuthConfig {
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == default_jwt_secret()
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }

    /// Reset link lifetime, clamped to [5 minutes, 24 hours]
    pub fn reset_token_ttl(&self) -> chrono::Duration {
        let minutes = if self.reset_token_ttl_minutes < MIN_RESET_TOKEN_TTL_MINUTES {
            warn!(
                "reset_token_ttl_minutes {} is below minimum {}, using minimum",
                self.reset_token_ttl_minutes, MIN_RESET_TOKEN_TTL_MINUTES
            );
            MIN_RESET_TOKEN_TTL_MINUTES
        } else if self.reset_token_ttl_minutes > MAX_RESET_TOKEN_TTL_MINUTES {
            warn!(
                "reset_token_ttl_minutes {} exceeds maximum {}, using maximum",
                self.reset_token_ttl_minutes, MAX_RESET_TOKEN_TTL_MINUTES
            );
            MAX_RESET_TOKEN_TTL_MINUTES
        } else {
            self.reset_token_ttl_minutes
        };
        chrono::Duration::minutes(minutes)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            reset_token_ttl_minutes: default_reset_token_ttl_minutes(),
        }
    }
}

/// Mail delivery backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailBackend {
    #[default]
    Log,
    Http,
}

/// Mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub backend: MailBackend,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    /// Frontend page reset tokens are appended to
    #[serde(default = "default_reset_url_base")]
    pub reset_url_base: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: MailBackend::default(),
            relay_url: None,
            from_address: default_from_address(),
            reset_url_base: default_reset_url_base(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

/// Administrator created on first start of an empty database
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl BootstrapConfig {
    pub fn admin(&self) -> Option<(&str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_db_path() -> String {
    "./data/labsite.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_reset_token_ttl_minutes() -> i64 {
    60
}

fn default_from_address() -> String {
    "no-reply@labsite.local".to_string()
}

fn default_reset_url_base() -> String {
    "http://localhost:3000/reset-password".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret must not be empty");
        }
        if self.auth.token_ttl_hours <= 0 {
            bail!("auth.token_ttl_hours must be positive");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if self.mail.backend == MailBackend::Http && self.mail.relay_url.is_none() {
            bail!("mail.relay_url is required for the http mail backend");
        }
        if self.bootstrap.admin_email.is_some() != self.bootstrap.admin_password.is_some() {
            bail!("bootstrap.admin_email and bootstrap.admin_password must be set together");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load("/nonexistent/labsite.toml").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert_eq!(config.mail.backend, MailBackend::Log);
        assert!(config.auth.uses_default_secret());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labsite.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 8080

[auth]
jwt_secret = "s3cret"

[logging]
format = "json"

[bootstrap]
admin_email = "admin@lab.example"
admin_password = "first"
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.auth.uses_default_secret());
        assert_eq!(config.bootstrap.admin(), Some(("admin@lab.example", "first")));
        assert_eq!(config.database.url(), "sqlite:./data/labsite.db");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labsite.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.mail.backend = MailBackend::Http;
        assert!(config.validate().is_err());
        config.mail.relay_url = Some("http://relay.local/send".into());
        assert!(config.validate().is_ok());

        config.bootstrap.admin_email = Some("a@x.com".into());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.token_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reset_ttl_is_clamped() {
        let mut auth = AuthConfig::default();
        assert_eq!(auth.reset_token_ttl(), chrono::Duration::minutes(60));
        auth.reset_token_ttl_minutes = 1;
        assert_eq!(auth.reset_token_ttl(), chrono::Duration::minutes(5));
        auth.reset_token_ttl_minutes = 100_000;
        assert_eq!(auth.reset_token_ttl(), chrono::Duration::minutes(24 * 60));
    }

    #[test]
    fn test_pool_settings() {
        let mut database = DatabaseConfig::default();
        let settings = database.pool_settings();
        assert_eq!(settings.max_connections, 5);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(30));
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(600)));

        database.idle_timeout_secs = 0;
        assert_eq!(database.pool_settings().idle_timeout, None);
    }
}
