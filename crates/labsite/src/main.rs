//! Labsite - accounts, sessions and access control for the lab website

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{BootstrapConfig, Config, LogFormat, LoggingConfig, MailBackend, MailConfig};
use labsite_api::{AppState, AuthSettings, HttpRelayMailer, LogMailer, Mailer, create_router};
use labsite_auth::JwtManager;
use labsite_db::{Database, NewUser, Profile, UserRole};

/// Labsite - accounts, sessions and access control for the lab website
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "LABSITE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "LABSITE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Labsite v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    if config.auth.uses_default_secret() {
        warn!("auth.jwt_secret is the built-in default; set a private value before going live");
    }

    // Initialize database
    if let Some(dir) = Path::new(&config.database.path).parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create database directory {:?}", dir))?;
        }
    }
    let db = Database::new(&config.database.url(), config.database.pool_settings())
        .await
        .context("Failed to open database")?;

    bootstrap_admin(&db, &config.bootstrap).await?;

    // Install the metrics recorder before any counter is touched
    let metrics_handle = if config.metrics.enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install metrics recorder")?;
        Some(Arc::new(handle))
    } else {
        None
    };

    let mailer = build_mailer(&config.mail)?;
    let settings = AuthSettings::new(config.auth.reset_token_ttl(), &config.mail.reset_url_base)
        .with_context(|| format!("Invalid mail.reset_url_base: {}", config.mail.reset_url_base))?;

    // Initialize JWT manager
    let jwt = Arc::new(JwtManager::new(&config.auth.jwt_secret, config.auth.token_ttl()));

    // Create application state
    let state = AppState::new(db, jwt, mailer, settings);

    // Create router
    let app = create_router(state, metrics_handle).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Create the configured administrator when the database is empty
async fn bootstrap_admin(db: &Database, bootstrap: &BootstrapConfig) -> Result<()> {
    let Some((email, password)) = bootstrap.admin() else {
        return Ok(());
    };

    let password_hash = labsite_auth::hash_password(password)?;
    let email = email.trim().to_lowercase();
    let created = db
        .insert_first_user(NewUser {
            email: email.clone(),
            password_hash,
            role: UserRole::Admin,
            name: "Administrator".to_string(),
            must_change_password: true,
            profile: Profile::default(),
        })
        .await?;

    match created {
        Some(user) => info!("Bootstrap administrator {} created", user.email),
        None => debug!("Accounts already exist, skipping bootstrap of {}", email),
    }
    Ok(())
}

/// Pick the mail backend
fn build_mailer(mail: &MailConfig) -> Result<Arc<dyn Mailer>> {
    match (mail.backend, &mail.relay_url) {
        (MailBackend::Http, Some(relay_url)) => Ok(Arc::new(HttpRelayMailer::new(
            relay_url.clone(),
            mail.from_address.clone(),
        )?)),
        (MailBackend::Http, None) => {
            anyhow::bail!("mail.relay_url is required for the http mail backend")
        }
        (MailBackend::Log, _) => {
            info!("Password reset links will be written to the log");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let json = logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
