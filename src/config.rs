//! Configuration for the mailbox, SMTP relay, model endpoint and poll policy
//!
//! All configuration is loaded from environment variables following the pattern
//! `MAIL_REPLY_<KEY>`. A `.env` file is read first by `main`, so the same keys
//! may live there.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Longest accepted poll interval (one day)
pub const MAX_SLEEP_SECS: u64 = 86_400;

/// IMAP mailbox configuration
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (typically 993 for TLS)
    pub port: u16,
    /// Whether to use TLS (currently enforced to `true`)
    pub secure: bool,
    /// Username for authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
    /// Mailbox polled for unread messages
    pub mailbox: String,
}

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpMode {
    /// Plain connection upgraded with STARTTLS (port 587)
    StartTls,
    /// Implicit TLS from the first byte (port 465)
    Tls,
}

/// SMTP relay configuration for outgoing replies
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP relay hostname
    pub host: String,
    /// SMTP relay port
    pub port: u16,
    /// Connection security
    pub mode: SmtpMode,
    /// Username for SMTP AUTH
    pub user: String,
    /// Password for SMTP AUTH
    pub pass: SecretString,
    /// Address placed in the `From` header of replies
    pub from_address: String,
    /// Whole-transaction timeout in milliseconds
    pub timeout_ms: u64,
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL without the `/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: SecretString,
    /// Model name sent with every request
    pub model: String,
}

/// Web search used to gather findings for a plan
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// URL template; `{query}` is replaced by the percent-encoded query
    pub url_template: String,
    /// Maximum characters of extracted page text handed to the integrator
    pub max_chars: usize,
}

/// Poll cadence and degraded-mode thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// CPU usage (percent) above which polling backs off
    pub cpu_threshold: f32,
    /// Memory usage (percent) above which polling backs off
    pub memory_threshold: f32,
    /// Sleep between cycles under normal load
    pub nominal_sleep_secs: u64,
    /// Sleep between cycles while the host is loaded
    pub degraded_sleep_secs: u64,
    /// Sleep after a cycle-level failure
    pub failure_sleep_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 60.0,
            memory_threshold: 70.0,
            nominal_sleep_secs: 300,
            degraded_sleep_secs: 1200,
            failure_sleep_secs: 300,
        }
    }
}

/// Daemon-wide configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Mailbox to read from
    pub imap: ImapConfig,
    /// Relay to send replies through
    pub smtp: SmtpConfig,
    /// Model endpoint for planning, integration and validation
    pub llm: LlmConfig,
    /// Search backend for the tool step
    pub search: SearchConfig,
    /// Poll cadence
    pub poll: PollConfig,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
    /// HTTP request timeout (model and search) in milliseconds
    pub http_timeout_ms: u64,
    /// Maximum characters of message body handed to the orchestrator
    pub body_max_chars: usize,
    /// Append log output to this file instead of stderr
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    /// Load all configuration from environment variables
    ///
    /// IMAP host, user and password are required, as is an API key (either
    /// `MAIL_REPLY_LLM_API_KEY` or the conventional `OPENAI_API_KEY`). SMTP
    /// settings fall back to the IMAP credentials so single-account providers
    /// need only one set of secrets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_REPLY_IMAP_HOST=imap.gmail.com
    /// MAIL_REPLY_IMAP_USER=user@gmail.com
    /// MAIL_REPLY_IMAP_PASS=app-password
    /// MAIL_REPLY_SMTP_HOST=smtp.gmail.com
    /// OPENAI_API_KEY=sk-...
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let imap = load_imap()?;
        let smtp = load_smtp(&imap)?;
        let llm = load_llm()?;

        let search = SearchConfig {
            url_template: optional_env("MAIL_REPLY_SEARCH_URL_TEMPLATE")?
                .unwrap_or_else(|| "https://html.duckduckgo.com/html/?q={query}".to_owned()),
            max_chars: parse_usize_env("MAIL_REPLY_SEARCH_MAX_CHARS", 8_000)?,
        };
        if !search.url_template.contains("{query}") {
            return Err(AppError::invalid(
                "MAIL_REPLY_SEARCH_URL_TEMPLATE must contain a {query} placeholder",
            ));
        }

        let defaults = PollConfig::default();
        let poll = PollConfig {
            cpu_threshold: parse_percent_env("MAIL_REPLY_CPU_THRESHOLD", defaults.cpu_threshold)?,
            memory_threshold: parse_percent_env(
                "MAIL_REPLY_MEMORY_THRESHOLD",
                defaults.memory_threshold,
            )?,
            nominal_sleep_secs: parse_sleep_secs_env(
                "MAIL_REPLY_NOMINAL_SLEEP_SECS",
                defaults.nominal_sleep_secs,
            )?,
            degraded_sleep_secs: parse_sleep_secs_env(
                "MAIL_REPLY_DEGRADED_SLEEP_SECS",
                defaults.degraded_sleep_secs,
            )?,
            failure_sleep_secs: parse_sleep_secs_env(
                "MAIL_REPLY_FAILURE_SLEEP_SECS",
                defaults.failure_sleep_secs,
            )?,
        };

        Ok(Self {
            imap,
            smtp,
            llm,
            search,
            poll,
            connect_timeout_ms: parse_u64_env("MAIL_REPLY_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: parse_u64_env("MAIL_REPLY_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: parse_u64_env("MAIL_REPLY_SOCKET_TIMEOUT_MS", 300_000)?,
            http_timeout_ms: parse_u64_env("MAIL_REPLY_HTTP_TIMEOUT_MS", 60_000)?,
            body_max_chars: parse_usize_env("MAIL_REPLY_BODY_MAX_CHARS", 20_000)?,
            log_file: optional_env("MAIL_REPLY_LOG_FILE")?.map(PathBuf::from),
        })
    }
}

fn load_imap() -> AppResult<ImapConfig> {
    Ok(ImapConfig {
        host: required_env("MAIL_REPLY_IMAP_HOST")?,
        port: parse_u16_env("MAIL_REPLY_IMAP_PORT", 993)?,
        secure: parse_bool_env("MAIL_REPLY_IMAP_SECURE", true)?,
        user: required_env("MAIL_REPLY_IMAP_USER")?,
        pass: SecretString::new(required_env("MAIL_REPLY_IMAP_PASS")?.into()),
        mailbox: optional_env("MAIL_REPLY_MAILBOX")?.unwrap_or_else(|| "INBOX".to_owned()),
    })
}

/// Load SMTP settings, defaulting credentials to the IMAP account
fn load_smtp(imap: &ImapConfig) -> AppResult<SmtpConfig> {
    let mode = match optional_env("MAIL_REPLY_SMTP_MODE")? {
        Some(raw) => parse_smtp_mode(&raw).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid MAIL_REPLY_SMTP_MODE: '{raw}' (expected starttls or tls)"
            ))
        })?,
        None => SmtpMode::StartTls,
    };
    let default_port = match mode {
        SmtpMode::StartTls => 587,
        SmtpMode::Tls => 465,
    };
    let user = optional_env("MAIL_REPLY_SMTP_USER")?.unwrap_or_else(|| imap.user.clone());
    let pass = match optional_env("MAIL_REPLY_SMTP_PASS")? {
        Some(p) => SecretString::new(p.into()),
        None => imap.pass.clone(),
    };
    let from_address = optional_env("MAIL_REPLY_FROM_ADDRESS")?.unwrap_or_else(|| user.clone());

    Ok(SmtpConfig {
        host: required_env("MAIL_REPLY_SMTP_HOST")?,
        port: parse_u16_env("MAIL_REPLY_SMTP_PORT", default_port)?,
        mode,
        user,
        pass,
        from_address,
        timeout_ms: parse_u64_env("MAIL_REPLY_SMTP_TIMEOUT_MS", 60_000)?,
    })
}

fn load_llm() -> AppResult<LlmConfig> {
    let api_key = match optional_env("MAIL_REPLY_LLM_API_KEY")? {
        Some(key) => key,
        None => required_env("OPENAI_API_KEY")?,
    };
    Ok(LlmConfig {
        base_url: optional_env("MAIL_REPLY_LLM_BASE_URL")?
            .unwrap_or_else(|| "https://api.openai.com/v1".to_owned())
            .trim_end_matches('/')
            .to_owned(),
        api_key: SecretString::new(api_key.into()),
        model: optional_env("MAIL_REPLY_LLM_MODEL")?.unwrap_or_else(|| "gpt-4o".to_owned()),
    })
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable; blank counts as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_smtp_mode(value: &str) -> Option<SmtpMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "starttls" | "start_tls" => Some(SmtpMode::StartTls),
        "tls" | "ssl" | "smtps" => Some(SmtpMode::Tls),
        _ => None,
    }
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a percentage in `0..=100`
fn parse_percent_value(value: &str) -> Option<f32> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| (0.0..=100.0).contains(v))
}

/// Parse a percentage environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a number in
/// `0..=100`.
fn parse_percent_env(key: &str, default: f32) -> AppResult<f32> {
    match env::var(key) {
        Ok(v) => parse_percent_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid percentage environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a poll interval in `1..=MAX_SLEEP_SECS` seconds
fn parse_sleep_secs_value(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|v| (1..=MAX_SLEEP_SECS).contains(v))
}

/// Parse a poll interval environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a whole number of
/// seconds in `1..=MAX_SLEEP_SECS`.
fn parse_sleep_secs_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => parse_sleep_secs_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid sleep interval {key}: '{v}' (expected 1..={MAX_SLEEP_SECS} seconds)"
            ))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match env::var(key) {
        Ok(v) => v.parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
