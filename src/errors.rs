//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Variants line up with
//! how the polling loop recovers from them: gateway and delivery failures
//! leave the message unread for a later cycle, orchestration failures abandon
//! the message without replying, and nothing here ever stops the daemon once
//! it is running.

use thiserror::Error;

/// Application error type
///
/// Covers every failure the auto-reply daemon may encounter, from startup
/// configuration through IMAP/SMTP transport to the model-backed
/// collaborators.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input (bad configuration value, malformed message id)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Authentication failure (IMAP LOGIN or SMTP AUTH rejected)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Transient mailbox failure (network, protocol, missing message)
    #[error("mailbox gateway failure: {0}")]
    Gateway(String),
    /// Mailbox state changed underneath us (UIDVALIDITY mismatch)
    #[error("conflict: {0}")]
    Conflict(String),
    /// Planner, tool, integrator or validator failed
    #[error("orchestration failed: {0}")]
    Orchestration(String),
    /// Outgoing reply could not be built or handed to the SMTP relay
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convenience constructor for `Orchestration`
    pub fn orchestration(msg: impl Into<String>) -> Self {
        Self::Orchestration(msg.into())
    }

    /// Short stable label for structured log fields
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_input`
    /// - `AuthFailed` → `auth_failed`
    /// - `Timeout` → `timeout`
    /// - `Gateway` → `gateway`
    /// - `Conflict` → `conflict`
    /// - `Orchestration` → `orchestration`
    /// - `Delivery` → `delivery`
    /// - `Internal` → `internal`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::AuthFailed(_) => "auth_failed",
            Self::Timeout(_) => "timeout",
            Self::Gateway(_) => "gateway",
            Self::Conflict(_) => "conflict",
            Self::Orchestration(_) => "orchestration",
            Self::Delivery(_) => "delivery",
            Self::Internal(_) => "internal",
        }
    }

    /// Re-tag any error raised inside a collaborator as `Orchestration`
    ///
    /// Transport failures from the model endpoint surface as gateway or
    /// timeout errors in the HTTP layer; to the message pipeline they all mean
    /// "no reply could be generated".
    pub fn into_orchestration(self) -> Self {
        match self {
            Self::Orchestration(_) => self,
            other => Self::Orchestration(other.to_string()),
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(AppError::Gateway("x".to_owned()).kind(), "gateway");
        assert_eq!(AppError::Delivery("x".to_owned()).kind(), "delivery");
        assert_eq!(AppError::orchestration("x").kind(), "orchestration");
        assert_eq!(AppError::invalid("x").kind(), "invalid_input");
    }

    #[test]
    fn into_orchestration_wraps_foreign_variants_once() {
        let wrapped = AppError::Timeout("model request".to_owned()).into_orchestration();
        assert_eq!(wrapped.kind(), "orchestration");
        assert!(wrapped.to_string().contains("model request"));

        let same = AppError::orchestration("bad plan").into_orchestration();
        assert_eq!(same.to_string(), "orchestration failed: bad plan");
    }
}
