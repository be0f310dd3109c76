//! Message ids the daemon logs and accepts on the command line
//!
//! An id pins a message to a mailbox snapshot: if the mailbox's UIDVALIDITY
//! changes, the id no longer refers to anything.

use std::fmt;

use crate::errors::{AppError, AppResult};

/// Where a listed message lives
///
/// Mailbox names may themselves contain colons (`Projects:2026:Q1`), so the
/// numeric fields are always read from the right:
///
/// ```text
/// imap:INBOX:12345:42
/// imap:Projects:2026:Q1:999:7
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageId {
    /// Mailbox name (may contain colons)
    pub mailbox: String,
    /// IMAP UIDVALIDITY (mailbox snapshot identifier)
    pub uidvalidity: u32,
    /// Message UID within mailbox
    pub uid: u32,
}

impl MessageId {
    /// Build an id for a UID seen in `mailbox` under `uidvalidity`
    pub fn new(mailbox: impl Into<String>, uidvalidity: u32, uid: u32) -> Self {
        Self {
            mailbox: mailbox.into(),
            uidvalidity,
            uid,
        }
    }

    /// Read back an id produced by [`MessageId::encode`]
    ///
    /// The last two segments are the UIDVALIDITY and UID; everything between
    /// the `imap` prefix and them is the mailbox. Anything else, including an
    /// empty mailbox, is `InvalidInput`.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let rest = raw
            .trim()
            .strip_prefix("imap:")
            .ok_or_else(|| AppError::invalid("message id must start with 'imap:'"))?;
        let mut tail = rest.rsplitn(3, ':');
        let (Some(uid), Some(uidvalidity), Some(mailbox)) = (tail.next(), tail.next(), tail.next())
        else {
            return Err(AppError::invalid(
                "message id must look like imap:<mailbox>:<uidvalidity>:<uid>",
            ));
        };
        if mailbox.is_empty() {
            return Err(AppError::invalid("message id mailbox cannot be empty"));
        }
        let number = |field: &str, what: &str| {
            field
                .parse::<u32>()
                .map_err(|_| AppError::invalid(format!("invalid {what} in message id: '{field}'")))
        };
        Ok(Self::new(
            mailbox,
            number(uidvalidity, "uidvalidity")?,
            number(uid, "uid")?,
        ))
    }

    /// `imap:{mailbox}:{uidvalidity}:{uid}`
    pub fn encode(&self) -> String {
        format!("imap:{}:{}:{}", self.mailbox, self.uidvalidity, self.uid)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::MessageId;

    #[test]
    fn parses_and_encodes_standard_message_id() {
        let id = MessageId::parse("imap:INBOX:123:42").expect("parse succeeds");
        assert_eq!(id.mailbox, "INBOX");
        assert_eq!(id.uidvalidity, 123);
        assert_eq!(id.uid, 42);
        assert_eq!(id.encode(), "imap:INBOX:123:42");
        assert_eq!(id.to_string(), id.encode());
    }

    #[test]
    fn parses_mailbox_with_colons() {
        let id = MessageId::parse("imap:Projects:2026:Q1:999:7").expect("parse succeeds");
        assert_eq!(id.mailbox, "Projects:2026:Q1");
        assert_eq!(id.uidvalidity, 999);
        assert_eq!(id.uid, 7);
    }

    #[test]
    fn rejects_invalid_prefix() {
        let err = MessageId::parse("smtp:INBOX:123:1").expect_err("must fail");
        assert_eq!(err.kind(), "invalid_input");
        assert!(err.to_string().contains("must start with 'imap:'"));
    }

    #[test]
    fn rejects_non_numeric_uid() {
        let err = MessageId::parse("imap:INBOX:123:abc").expect_err("must fail");
        assert!(err.to_string().contains("invalid uid"));
    }

    #[test]
    fn rejects_missing_segments_and_empty_mailbox() {
        assert!(MessageId::parse("imap:123:42").is_err());
        let err = MessageId::parse("imap::123:42").expect_err("must fail");
        assert!(err.to_string().contains("mailbox cannot be empty"));
    }
}
