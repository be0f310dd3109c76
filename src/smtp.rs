//! SMTP delivery of replies
//!
//! Thin wrapper over `lettre`'s async transport. One transport is built at
//! startup and reused for every reply; `lettre` opens a connection per send.

use std::time::Duration;

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::{SmtpConfig, SmtpMode};
use crate::errors::{AppError, AppResult};

/// Outgoing mail transport
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    /// Build the transport from config
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the relay host or from address is unusable
    pub fn new(config: &SmtpConfig) -> AppResult<Self> {
        let builder = match config.mode {
            SmtpMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host),
            SmtpMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
        }
        .map_err(|e| AppError::InvalidInput(format!("invalid SMTP relay '{}': {e}", config.host)))?;

        let credentials = Credentials::new(
            config.user.clone(),
            config.pass.expose_secret().to_owned(),
        );
        let transport = builder
            .port(config.port)
            .credentials(credentials)
            .timeout(Some(Duration::from_millis(config.timeout_ms)))
            .build();

        let from = parse_mailbox(&config.from_address)
            .map_err(|e| AppError::InvalidInput(format!("invalid from address: {e}")))?;

        Ok(Self { transport, from })
    }

    /// Send a plain-text message
    ///
    /// # Errors
    ///
    /// - `Delivery` if the recipient is unparseable or the relay rejects the
    ///   message
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let message = build_message(&self.from, to, subject, body)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| AppError::Delivery(format!("SMTP send error: {e}")))?;
        info!(
            to = %to,
            subject = %subject,
            code = %response.code(),
            "reply sent"
        );
        Ok(())
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, lettre::address::AddressError> {
    raw.trim().parse::<Mailbox>()
}

/// Assemble the outgoing message
fn build_message(from: &Mailbox, to: &str, subject: &str, body: &str) -> AppResult<Message> {
    let recipient = parse_mailbox(to)
        .map_err(|e| AppError::Delivery(format!("invalid recipient '{to}': {e}")))?;
    Message::builder()
        .from(from.clone())
        .to(recipient)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_owned())
        .map_err(|e| AppError::Delivery(format!("failed to build message: {e}")))
}
