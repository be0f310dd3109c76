//! Message parsing and MIME handling
//!
//! Parses RFC822 messages using `mailparse` and extracts the text the
//! orchestrator will answer. HTML-only messages are flattened to text with
//! `html2text`. Attachments are never read.

use std::collections::BTreeMap;

use mailparse::{DispositionType, MailHeader, ParsedMail};

use crate::errors::{AppError, AppResult};

/// Column width used when flattening HTML bodies
const HTML_TEXT_WIDTH: usize = 100;

/// Parsed message representation
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Parsed From header
    pub from: Option<String>,
    /// Parsed Subject header
    pub subject: Option<String>,
    /// Parsed Message-ID header
    pub message_id: Option<String>,
    /// All headers as key-value pairs
    pub headers_all: Vec<(String, String)>,
    /// Readable body text, truncated; `None` when nothing usable was found
    pub body_text: Option<String>,
}

/// Parse RFC822 message into structured representation
///
/// The first inline `text/plain` part wins. Without one, the first inline
/// `text/html` part is converted to text. Bodies that are empty after
/// trimming count as absent.
///
/// # Errors
///
/// - `Gateway` if `mailparse` cannot parse the message at all
pub fn parse_message(raw: &[u8], body_max_chars: usize) -> AppResult<ParsedMessage> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| AppError::Gateway(format!("failed to parse RFC822 message: {e}")))?;

    let headers = parse_all_headers(raw)?;
    let mut body_text = None;
    let mut body_html = None;
    walk_parts(&parsed, &mut body_text, &mut body_html);

    let text = body_text
        .or_else(|| body_html.and_then(|html| html_to_text(&html)))
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(t, body_max_chars));

    let header_map = to_header_map(&headers);
    Ok(ParsedMessage {
        from: header_map.get("from").cloned(),
        subject: header_map.get("subject").cloned(),
        message_id: header_map.get("message-id").cloned(),
        headers_all: headers,
        body_text: text,
    })
}

/// Walk MIME part tree recursively, keeping the first inline text and HTML
/// bodies
fn walk_parts(part: &ParsedMail<'_>, body_text: &mut Option<String>, body_html: &mut Option<String>) {
    if part.subparts.is_empty() {
        let ctype = part.ctype.mimetype.to_ascii_lowercase();
        let disp = part.get_content_disposition();
        let is_attachment = disp.disposition == DispositionType::Attachment
            || disp.params.contains_key("filename");
        if is_attachment {
            return;
        }

        if ctype == "text/plain"
            && body_text.is_none()
            && let Ok(text) = part.get_body()
        {
            *body_text = Some(text);
        }

        if ctype == "text/html"
            && body_html.is_none()
            && let Ok(html) = part.get_body()
        {
            *body_html = Some(html);
        }
        return;
    }

    for sub in &part.subparts {
        walk_parts(sub, body_text, body_html);
    }
}

/// Flatten HTML into readable text, one block per line
fn html_to_text(html: &str) -> Option<String> {
    html2text::from_read(html.as_bytes(), HTML_TEXT_WIDTH).ok()
}

/// Parse all headers from raw message
fn parse_all_headers(raw: &[u8]) -> AppResult<Vec<(String, String)>> {
    let (headers, _) = mailparse::parse_headers(raw)
        .map_err(|e| AppError::Gateway(format!("failed to parse message headers: {e}")))?;
    Ok(to_tuples(headers))
}

/// Convert mailparse headers to tuples
fn to_tuples(headers: Vec<MailHeader<'_>>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect()
}

/// Convert header tuples to case-insensitive map
///
/// Returns first value for each header key (case-insensitive).
fn to_header_map(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (k, v) in headers {
        let key = k.to_ascii_lowercase();
        map.entry(key).or_insert_with(|| v.clone());
    }
    map
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input;
    }
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_message, truncate_chars};

    #[test]
    fn truncates_unicode_by_character() {
        let input = "a😀b😀c".to_owned();
        let out = truncate_chars(input, 4);
        assert_eq!(out, "a😀b😀");
    }

    #[test]
    fn parses_simple_plain_text_message() {
        let raw = b"From: sender@example.com\r\nTo: user@example.com\r\nSubject: Hi\r\nMessage-ID: <abc@example.com>\r\n\r\nHello there";
        let parsed = parse_message(raw, 2000).expect("parse should succeed");

        assert_eq!(parsed.subject.as_deref(), Some("Hi"));
        assert_eq!(parsed.from.as_deref(), Some("sender@example.com"));
        assert_eq!(parsed.message_id.as_deref(), Some("<abc@example.com>"));
        assert_eq!(parsed.body_text.as_deref(), Some("Hello there"));
    }

    #[test]
    fn prefers_plain_text_part_over_html() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: Both\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>html version</p>\r\n",
            "--b1\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "plain version\r\n",
            "--b1--\r\n",
        );
        let parsed = parse_message(raw.as_bytes(), 2000).expect("parse should succeed");
        assert_eq!(parsed.body_text.as_deref(), Some("plain version"));
    }

    #[test]
    fn converts_html_only_body_to_text() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: Html\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<html><body><p>When does the <b>store</b> open?</p></body></html>\r\n",
        );
        let parsed = parse_message(raw.as_bytes(), 2000).expect("parse should succeed");
        let body = parsed.body_text.expect("html converted to text");
        assert!(body.contains("When does the"));
        assert!(!body.contains("<p>"));
    }

    #[test]
    fn attachment_only_message_has_no_body() {
        let raw = concat!(
            "From: a@example.com\r\n",
            "Subject: File\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"b2\"\r\n",
            "\r\n",
            "--b2\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
            "\r\n",
            "attached notes\r\n",
            "--b2--\r\n",
        );
        let parsed = parse_message(raw.as_bytes(), 2000).expect("parse should succeed");
        assert!(parsed.body_text.is_none());
    }

    #[test]
    fn blank_body_counts_as_absent() {
        let raw = b"From: a@example.com\r\nSubject: Empty\r\n\r\n   \r\n";
        let parsed = parse_message(raw, 2000).expect("parse should succeed");
        assert!(parsed.body_text.is_none());
    }
}
