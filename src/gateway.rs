//! Mailbox gateway: the I/O edge of the daemon
//!
//! The poll loop only sees the [`MailboxGateway`] trait. The production
//! implementation reads over IMAP and sends over SMTP; each call opens its own
//! IMAP session, does one thing, and logs out. There are no retries here: a
//! failure leaves the message unread and the next cycle picks it up again.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::imap::{self, ImapSession};
use crate::message_id::MessageId;
use crate::mime;
use crate::smtp::SmtpSender;

/// Headers the pipeline needs to address a reply
#[derive(Debug, Clone, Default)]
pub struct MessageHeaders {
    /// `From` header, used as the reply recipient
    pub from: Option<String>,
    /// `Subject` header
    pub subject: Option<String>,
    /// `Message-ID` header, for log correlation only
    pub message_id: Option<String>,
    /// Every header in message order
    pub all: Vec<(String, String)>,
}

/// Decoded content of one message
#[derive(Debug, Clone, Default)]
pub struct FetchedMessage {
    /// Readable body; `None` means no usable content (skip, not an error)
    pub body_text: Option<String>,
    /// Parsed headers
    pub headers: MessageHeaders,
}

/// Everything the poll loop needs from a mailbox
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// Unread message ids in processing order; empty is a normal result
    async fn list_unread(&self) -> AppResult<Vec<MessageId>>;

    /// Fetch and decode one message without marking it read
    async fn fetch(&self, id: &MessageId) -> AppResult<FetchedMessage>;

    /// Send a plain-text message; failures are `AppError::Delivery`
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;

    /// Flag a message as `\Seen`
    async fn mark_read(&self, id: &MessageId) -> AppResult<()>;
}

/// IMAP reader plus SMTP sender for a single account
pub struct ImapSmtpGateway {
    config: Arc<AppConfig>,
    smtp: SmtpSender,
}

impl ImapSmtpGateway {
    /// Build the gateway; fails only on unusable SMTP settings
    pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
        let smtp = SmtpSender::new(&config.smtp)?;
        Ok(Self { config, smtp })
    }

    /// Connect, log in and select the polled mailbox read-write
    async fn open_mailbox(&self) -> AppResult<(ImapSession, u32)> {
        let mut session = imap::connect_authenticated(&self.config).await?;
        let uidvalidity =
            imap::select_mailbox_readwrite(&self.config, &mut session, &self.config.imap.mailbox)
                .await?;
        Ok((session, uidvalidity))
    }

    /// Open a session on the message's mailbox and confirm its UIDs still
    /// mean what they meant when the id was listed
    async fn open_for(&self, id: &MessageId) -> AppResult<ImapSession> {
        let mut session = imap::connect_authenticated(&self.config).await?;
        let current = imap::select_mailbox_readwrite(&self.config, &mut session, &id.mailbox).await?;
        if current != id.uidvalidity {
            imap::logout(&self.config, session).await;
            return Err(AppError::Conflict(
                "message uidvalidity no longer matches mailbox".to_owned(),
            ));
        }
        Ok(session)
    }
}

#[async_trait]
impl MailboxGateway for ImapSmtpGateway {
    async fn list_unread(&self) -> AppResult<Vec<MessageId>> {
        let (mut session, uidvalidity) = self.open_mailbox().await?;
        let uids = imap::uid_search(&self.config, &mut session, "UNSEEN").await;
        imap::logout(&self.config, session).await;

        let mailbox = &self.config.imap.mailbox;
        let ids: Vec<MessageId> = uids?
            .into_iter()
            .map(|uid| MessageId::new(mailbox.clone(), uidvalidity, uid))
            .collect();
        debug!(mailbox = %mailbox, count = ids.len(), "listed unread messages");
        Ok(ids)
    }

    async fn fetch(&self, id: &MessageId) -> AppResult<FetchedMessage> {
        let mut session = self.open_for(id).await?;
        let raw = imap::fetch_raw_message(&self.config, &mut session, id.uid).await;
        imap::logout(&self.config, session).await;

        let parsed = mime::parse_message(&raw?, self.config.body_max_chars)?;
        Ok(FetchedMessage {
            body_text: parsed.body_text,
            headers: MessageHeaders {
                from: parsed.from,
                subject: parsed.subject,
                message_id: parsed.message_id,
                all: parsed.headers_all,
            },
        })
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        self.smtp.send(to, subject, body).await
    }

    async fn mark_read(&self, id: &MessageId) -> AppResult<()> {
        let mut session = self.open_for(id).await?;
        let stored = imap::uid_store(&self.config, &mut session, id.uid, "+FLAGS.SILENT (\\Seen)").await;
        imap::logout(&self.config, session).await;
        stored
    }
}
