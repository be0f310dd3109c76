//! Per-message pipeline: fetch → generate → send → mark read
//!
//! Every failure is contained here and reported as a [`MessageOutcome`], so
//! one bad message never stops the rest of the cycle. Anything short of a
//! successful send leaves the message unread for the next cycle.

use std::fmt;
use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::errors::AppError;
use crate::gateway::MailboxGateway;
use crate::message_id::MessageId;
use crate::orchestrator::{ResponseOrchestrator, Task};

const REPLY_PREFIX: &str = "Re: ";
const MISSING_SUBJECT: &str = "No Subject";

/// Why a message was left alone without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No readable body could be extracted
    NoContent,
    /// No `From` header to reply to
    MissingSender,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContent => f.write_str("no usable content"),
            Self::MissingSender => f.write_str("missing From header"),
        }
    }
}

/// Result of processing one message
#[derive(Debug)]
pub enum MessageOutcome {
    /// Reply sent and source marked read
    Replied,
    /// Left unread on purpose
    Skipped(SkipReason),
    /// Left unread (or, for a failed mark-read, left unflagged) after an error
    Failed(AppError),
}

/// Runs the per-message steps against a gateway and an orchestrator
#[derive(Clone)]
pub struct MessagePipeline {
    gateway: Arc<dyn MailboxGateway>,
    orchestrator: ResponseOrchestrator,
}

impl MessagePipeline {
    pub fn new(gateway: Arc<dyn MailboxGateway>, orchestrator: ResponseOrchestrator) -> Self {
        Self {
            gateway,
            orchestrator,
        }
    }

    /// Process one message; never returns an error
    pub async fn process(&self, id: &MessageId) -> MessageOutcome {
        let span = info_span!("message", id = %id);
        let outcome = self.process_inner(id).instrument(span.clone()).await;
        let _entered = span.enter();
        match &outcome {
            MessageOutcome::Replied => {}
            MessageOutcome::Skipped(SkipReason::MissingSender) => {
                error!("skipping message: missing From header")
            }
            MessageOutcome::Skipped(reason) => warn!(%reason, "skipping message"),
            MessageOutcome::Failed(e) => {
                error!(kind = e.kind(), error = %e, "message processing failed")
            }
        }
        outcome
    }

    async fn process_inner(&self, id: &MessageId) -> MessageOutcome {
        let message = match self.gateway.fetch(id).await {
            Ok(m) => m,
            Err(e) => return MessageOutcome::Failed(e),
        };
        debug!(
            message_id = message.headers.message_id.as_deref().unwrap_or("-"),
            header_count = message.headers.all.len(),
            "message fetched"
        );

        let Some(body) = message.body_text.filter(|b| !b.trim().is_empty()) else {
            return MessageOutcome::Skipped(SkipReason::NoContent);
        };

        let reply = match self.orchestrator.generate(&Task::new(body)).await {
            Ok(r) => r,
            Err(e) => return MessageOutcome::Failed(e.into_orchestration()),
        };
        debug!(chars = reply.len(), "reply generated");

        let Some(to) = message
            .headers
            .from
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
        else {
            return MessageOutcome::Skipped(SkipReason::MissingSender);
        };
        let subject = reply_subject(message.headers.subject.as_deref());

        if let Err(e) = self.gateway.send(to, &subject, &reply).await {
            return MessageOutcome::Failed(e);
        }
        info!(to = %to, "responded to message");

        if let Err(e) = self.gateway.mark_read(id).await {
            return MessageOutcome::Failed(e);
        }
        MessageOutcome::Replied
    }
}

/// `Re: <subject>`, without stacking prefixes
pub fn reply_subject(original: Option<&str>) -> String {
    let subject = original
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(MISSING_SUBJECT);
    let already_reply = subject
        .get(..3)
        .is_some_and(|p| p.eq_ignore_ascii_case("re:"));
    if already_reply {
        subject.to_owned()
    } else {
        format!("{REPLY_PREFIX}{subject}")
    }
}
