//! IMAP transport and session operations
//!
//! Every network step runs under [`bounded`], which turns an elapsed deadline
//! into `Timeout` and a protocol error into `Gateway`. Only TLS connections
//! are made.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

/// Authenticated IMAP session over TLS
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Run one IMAP step under a deadline
async fn bounded<T, E, F>(limit: Duration, step: &str, fut: F) -> AppResult<T>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::Gateway(format!("{step} failed: {e}"))),
        Err(_) => Err(AppError::Timeout(format!("{step} timed out"))),
    }
}

fn socket_timeout(config: &AppConfig) -> Duration {
    Duration::from_millis(config.socket_timeout_ms)
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(tls))
}

/// Login errors that mention authentication are credential problems; the
/// rest are treated as transport failures
fn classify_login_error(message: String) -> AppError {
    if message.to_ascii_lowercase().contains("auth") || message.contains("LOGIN") {
        AppError::AuthFailed(message)
    } else {
        AppError::Gateway(message)
    }
}

/// Connect, read the greeting and log in
///
/// TCP connect is bounded by `connect_timeout_ms`; the TLS handshake,
/// greeting and LOGIN each by `greeting_timeout_ms`.
///
/// # Errors
///
/// - `InvalidInput` if TLS is disabled or the host is not a valid SNI name
/// - `Timeout` if any phase exceeds its deadline
/// - `AuthFailed` if the server rejects the credentials
/// - `Gateway` for other transport or protocol failures
pub async fn connect_authenticated(config: &AppConfig) -> AppResult<ImapSession> {
    let account = &config.imap;
    if !account.secure {
        return Err(AppError::invalid(
            "insecure IMAP is not supported; set MAIL_REPLY_IMAP_SECURE=true",
        ));
    }
    let connect_limit = Duration::from_millis(config.connect_timeout_ms);
    let greeting_limit = Duration::from_millis(config.greeting_timeout_ms);

    let server_name = ServerName::try_from(account.host.clone())
        .map_err(|_| AppError::invalid("invalid IMAP host for TLS SNI"))?;
    let tcp = bounded(
        connect_limit,
        "tcp connect",
        TcpStream::connect((account.host.as_str(), account.port)),
    )
    .await?;
    let tls = bounded(
        greeting_limit,
        "TLS handshake",
        tls_connector().connect(server_name, tcp),
    )
    .await?;

    let mut client = Client::new(tls);
    if bounded(greeting_limit, "IMAP greeting", client.read_response())
        .await?
        .is_none()
    {
        return Err(AppError::Gateway(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let login = client.login(account.user.as_str(), account.pass.expose_secret());
    match tokio::time::timeout(greeting_limit, login).await {
        Ok(Ok(session)) => {
            debug!(host = %account.host, user = %account.user, "IMAP login succeeded");
            Ok(session)
        }
        Ok(Err((e, _))) => Err(classify_login_error(e.to_string())),
        Err(_) => Err(AppError::Timeout("IMAP login timed out".to_owned())),
    }
}

/// Close the session; failures are only logged
pub async fn logout(config: &AppConfig, mut session: ImapSession) {
    if let Err(e) = bounded(socket_timeout(config), "IMAP logout", session.logout()).await {
        debug!(error = %e, "IMAP logout failed (non-fatal)");
    }
}

/// `SELECT` a mailbox read-write and return its `UIDVALIDITY`
pub async fn select_mailbox_readwrite(
    config: &AppConfig,
    session: &mut ImapSession,
    mailbox: &str,
) -> AppResult<u32> {
    let step = format!("SELECT '{mailbox}'");
    let selected = bounded(socket_timeout(config), &step, session.select(mailbox)).await?;
    selected
        .uid_validity
        .ok_or_else(|| AppError::Gateway(format!("mailbox '{mailbox}' has no UIDVALIDITY")))
}

/// `UID FETCH` a single message and return its first response
pub async fn fetch_one(
    config: &AppConfig,
    session: &mut ImapSession,
    uid: u32,
    query: &str,
) -> AppResult<Fetch> {
    let limit = socket_timeout(config);
    let stream = bounded(limit, "UID FETCH", session.uid_fetch(uid.to_string(), query)).await?;
    let fetches: Vec<Fetch> = bounded(limit, "UID FETCH stream", stream.try_collect()).await?;
    fetches
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Gateway(format!("message uid {uid} not found")))
}

/// Full message source, fetched with `BODY.PEEK[]` so `\Seen` is not set
pub async fn fetch_raw_message(
    config: &AppConfig,
    session: &mut ImapSession,
    uid: u32,
) -> AppResult<Vec<u8>> {
    let fetch = fetch_one(config, session, uid, "(UID BODY.PEEK[])").await?;
    fetch
        .body()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| AppError::Gateway(format!("message uid {uid} has no body")))
}

/// `UID SEARCH`, oldest first
pub async fn uid_search(
    config: &AppConfig,
    session: &mut ImapSession,
    query: &str,
) -> AppResult<Vec<u32>> {
    let set = bounded(socket_timeout(config), "UID SEARCH", session.uid_search(query)).await?;
    let mut uids: Vec<u32> = set.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

/// `UID STORE` a flag change, e.g. `+FLAGS.SILENT (\Seen)`
pub async fn uid_store(
    config: &AppConfig,
    session: &mut ImapSession,
    uid: u32,
    query: &str,
) -> AppResult<()> {
    let limit = socket_timeout(config);
    let stream = bounded(limit, "UID STORE", session.uid_store(uid.to_string(), query)).await?;
    let _: Vec<Fetch> = bounded(limit, "UID STORE stream", stream.try_collect()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{bounded, classify_login_error};

    #[test]
    fn login_errors_split_into_auth_and_gateway() {
        assert_eq!(
            classify_login_error("NO [AUTHENTICATIONFAILED] bad password".to_owned()).kind(),
            "auth_failed"
        );
        assert_eq!(
            classify_login_error("connection reset by peer".to_owned()).kind(),
            "gateway"
        );
    }

    #[tokio::test]
    async fn bounded_maps_errors_and_deadlines() {
        let ok: Result<u8, String> = Ok(1);
        assert_eq!(
            bounded(Duration::from_secs(1), "step", async { ok })
                .await
                .expect("value passes through"),
            1
        );

        let failed: Result<u8, String> = Err("boom".to_owned());
        let err = bounded(Duration::from_secs(1), "step", async { failed })
            .await
            .expect_err("error maps");
        assert_eq!(err.kind(), "gateway");
        assert!(err.to_string().contains("step failed: boom"));

        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<u8, String>(1)
        };
        let err = bounded(Duration::from_millis(10), "slow step", slow)
            .await
            .expect_err("deadline maps");
        assert_eq!(err.kind(), "timeout");
    }
}
