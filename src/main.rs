//! mail-auto-reply: IMAP/SMTP auto-reply daemon
//!
//! Polls a mailbox for unread messages, drafts a reply to each through a
//! bounded plan → search → integrate → validate loop against a chat model,
//! sends it, and marks the original read. Polling slows down while the host
//! is busy and never stops on errors.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, logging and CLI
//! - [`config`]: Environment-driven configuration
//! - [`errors`]: Application error model
//! - [`scheduler`]: Resource-adaptive poll loop
//! - [`pipeline`]: Per-message fetch → generate → send → mark read
//! - [`orchestrator`]: Bounded feedback loop over the four collaborators
//! - [`agents`]: Model-backed planner/integrator/validator and web search tool
//! - [`llm`]: Chat-completion client
//! - [`resources`]: Host CPU/memory sampling
//! - [`gateway`]: Mailbox trait and its IMAP/SMTP implementation
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`smtp`]: Reply delivery
//! - [`mime`]: Message parsing and body extraction
//! - [`message_id`]: Stable, opaque message ID parse/encode logic

mod agents;
mod config;
mod errors;
mod gateway;
mod imap;
mod llm;
mod message_id;
mod mime;
mod orchestrator;
mod pipeline;
mod prompts;
mod resources;
mod scheduler;
mod smtp;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agents::{LlmIntegrator, LlmPlanner, LlmValidator, WebSearcher};
use config::AppConfig;
use errors::{AppError, AppResult};
use gateway::{ImapSmtpGateway, MailboxGateway};
use llm::{LlmClient, OpenAiClient};
use message_id::MessageId;
use orchestrator::ResponseOrchestrator;
use pipeline::{MessageOutcome, MessagePipeline};
use resources::SysinfoSampler;
use scheduler::{PollPolicy, PollScheduler, TokioSleeper};

/// Command-line flags; everything else comes from the environment
#[derive(Debug, Parser)]
#[command(version, about = "Reply to unread mail with a model-drafted answer")]
struct Cli {
    /// Load environment from this file instead of `./.env`
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Run a single poll cycle, report its sleep decision, and exit
    #[arg(long, conflicts_with = "message")]
    once: bool,

    /// Process one message by id (`imap:<mailbox>:<uidvalidity>:<uid>`) and exit
    #[arg(long, value_name = "ID")]
    message: Option<String>,
}

/// Application entry point
///
/// # Example
///
/// ```text
/// MAIL_REPLY_IMAP_HOST=imap.example.com \
/// MAIL_REPLY_IMAP_USER=user@example.com \
/// MAIL_REPLY_IMAP_PASS=secret \
/// MAIL_REPLY_SMTP_HOST=smtp.example.com \
/// OPENAI_API_KEY=sk-... \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let config = Arc::new(AppConfig::load_from_env()?);
    init_tracing(config.log_file.as_deref())?;

    let gateway: Arc<dyn MailboxGateway> = Arc::new(ImapSmtpGateway::new(config.clone())?);
    let pipeline = MessagePipeline::new(gateway.clone(), build_orchestrator(&config)?);

    if let Some(raw) = &cli.message {
        let id = MessageId::parse(raw)?;
        return match pipeline.process(&id).await {
            MessageOutcome::Failed(e) => Err(e.into()),
            outcome => {
                info!(?outcome, "message processed");
                Ok(())
            }
        };
    }

    let scheduler = PollScheduler::new(
        gateway,
        pipeline,
        Arc::new(SysinfoSampler::new()),
        Arc::new(TokioSleeper),
        PollPolicy::new(config.poll),
    );

    info!(
        host = %config.imap.host,
        mailbox = %config.imap.mailbox,
        model = %config.llm.model,
        "auto-reply daemon started"
    );

    if cli.once {
        let report = scheduler.run_cycle().await?;
        info!(
            listed = report.listed,
            replied = report.replied,
            skipped = report.skipped,
            failed = report.failed,
            next_sleep_seconds = report.decision.sleep_seconds,
            reason = ?report.decision.reason,
            "single cycle complete"
        );
        return Ok(());
    }

    tokio::select! {
        _ = scheduler.run_forever() => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupt received; shutting down");
        }
    }
    Ok(())
}

/// Wire the model-backed collaborators around one shared client
fn build_orchestrator(config: &AppConfig) -> AppResult<ResponseOrchestrator> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm, config.http_timeout_ms)?);
    Ok(ResponseOrchestrator::new(
        Arc::new(LlmPlanner::new(llm.clone())),
        Arc::new(WebSearcher::new(
            llm.clone(),
            config.search.clone(),
            config.http_timeout_ms,
        )?),
        Arc::new(LlmIntegrator::new(llm.clone())),
        Arc::new(LlmValidator::new(llm)?),
    ))
}

/// Log to stderr, or append to a file when one is configured
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
fn init_tracing(log_file: Option<&Path>) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    AppError::InvalidInput(format!(
                        "cannot open log file '{}': {e}",
                        path.display()
                    ))
                })?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
