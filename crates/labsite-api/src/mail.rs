//! Outgoing mail
//!
//! The API only ever sends one kind of message, the password-reset link.
//! Delivery is delegated to a `Mailer`; the server picks one from config.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail relay rejected message with status {0}")]
    Rejected(u16),
}

/// Delivery channel for account emails
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a password-reset link to `to`
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), MailError>;
}

pub const RESET_SUBJECT: &str = "Password reset request";

/// Plain-text body of the reset email
pub fn reset_body(reset_url: &str) -> String {
    format!(
        "You are receiving this email because a password reset was requested for your \
         account.\n\nOpen the following link to choose a new password:\n\n{}\n\n\
         The link expires shortly. If you did not request a reset, ignore this email \
         and your password will stay unchanged.\n",
        reset_url
    )
}

/// Mailer that only writes the link to the log; for development setups
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), MailError> {
        info!(recipient = %to, "Password reset link: {}", reset_url);
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Mailer posting JSON messages to an HTTP mail relay
pub struct HttpRelayMailer {
    client: reqwest::Client,
    relay_url: String,
    from_address: String,
}

impl HttpRelayMailer {
    pub fn new(relay_url: String, from_address: String) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        info!("Sending account mail through relay {}", relay_url);
        Ok(Self {
            client,
            relay_url,
            from_address,
        })
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send_password_reset(&self, to: &str, reset_url: &str) -> Result<(), MailError> {
        let message = RelayMessage {
            from: &self.from_address,
            to,
            subject: RESET_SUBJECT,
            text: reset_body(reset_url),
        };

        let response = self.client.post(&self.relay_url).json(&message).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Rejected(status.as_u16()));
        }

        debug!("Relay accepted reset email for {}", to);
        Ok(())
    }
}
