//! Mailbox transport: raw IMAP over rustls for fetching, SMTP via lettre for sending.
//!
//! Folders are opened with `EXAMINE`, so triage never changes `\Seen` flags.
//! Both protocols are blocking and run under `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{HeaderValue, MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::email_types::{
    MailMessage, extract_addresses, strip_html, strip_quoted_text,
};
use crate::error::{ConfigError, TransportError};
use crate::pipeline::types::{FetchFailure, FetchedMail, MailTransport, OutgoingReply};
use crate::threading::{self, ThreadingHeaders};

const DEFAULT_SENT_FOLDER: &str = "[Gmail]/Sent Mail";
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub inbox_folder: String,
    pub sent_folder: String,
}

impl MailConfig {
    /// Build config from environment variables.
    ///
    /// `EMAIL_IMAP_HOST`, `EMAIL_USERNAME` and `EMAIL_PASSWORD` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = required("EMAIL_IMAP_HOST")?;
        let imap_port = port("EMAIL_IMAP_PORT", 993)?;

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));
        let smtp_port = port("EMAIL_SMTP_PORT", 587)?;

        let username = required("EMAIL_USERNAME")?;
        let password = SecretString::from(required("EMAIL_PASSWORD")?);
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let sent_folder =
            std::env::var("EMAIL_SENT_FOLDER").unwrap_or_else(|_| DEFAULT_SENT_FOLDER.into());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            inbox_folder: "INBOX".into(),
            sent_folder,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.into()))
}

fn port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// IMAP + SMTP mailbox transport.
pub struct ImapSmtpTransport {
    config: Arc<MailConfig>,
}

impl ImapSmtpTransport {
    pub fn new(config: MailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn fetch_folder(
        &self,
        folder: &str,
        since: DateTime<Utc>,
    ) -> Result<FetchedMail, TransportError> {
        let config = Arc::clone(&self.config);
        let folder_name = folder.to_string();

        let fetched = tokio::task::spawn_blocking(move || {
            fetch_folder_imap(&config, &folder_name, since)
        })
        .await
        .map_err(|e| TransportError::FetchFailed {
            folder: folder.to_string(),
            reason: format!("fetch task failed: {e}"),
        })?
        .map_err(|e| TransportError::FetchFailed {
            folder: folder.to_string(),
            reason: e.to_string(),
        })?;

        info!(
            folder,
            count = fetched.messages.len(),
            failed = fetched.failures.len(),
            "Fetched messages"
        );
        Ok(fetched)
    }
}

#[async_trait]
impl MailTransport for ImapSmtpTransport {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<FetchedMail, TransportError> {
        self.fetch_folder(&self.config.inbox_folder, since).await
    }

    async fn fetch_sent_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MailMessage>, TransportError> {
        let fetched = self.fetch_folder(&self.config.sent_folder, since).await?;
        for failed in &fetched.failures {
            warn!(
                folder = %failed.folder,
                id = %failed.id,
                reason = %failed.reason,
                "Sent message unavailable for dedup"
            );
        }
        Ok(fetched.messages)
    }

    async fn send(&self, reply: OutgoingReply<'_>) -> Result<(), TransportError> {
        let email = build_reply(&self.config.from_address, reply)?;
        let config = Arc::clone(&self.config);
        let to = reply.to.to_string();

        tokio::task::spawn_blocking(move || send_smtp(&config, &email))
            .await
            .map_err(|e| TransportError::SendFailed {
                to: to.clone(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|reason| TransportError::SendFailed {
                to: to.clone(),
                reason,
            })?;

        info!(to = %to, "Email sent");
        Ok(())
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Build the outgoing message, carrying the threading headers when present.
pub fn build_reply(from: &str, reply: OutgoingReply<'_>) -> Result<Message, TransportError> {
    let from: Mailbox = from.parse().map_err(|e| TransportError::InvalidAddress {
        address: from.to_string(),
        reason: format!("{e}"),
    })?;
    let to: Mailbox = reply.to.parse().map_err(|e| TransportError::InvalidAddress {
        address: reply.to.to_string(),
        reason: format!("{e}"),
    })?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(reply.subject);

    if let Some(in_reply_to) = reply.headers.in_reply_to_header() {
        builder = builder.in_reply_to(in_reply_to);
    }
    if let Some(references) = reply.headers.references_header() {
        builder = builder.references(references);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(reply.body.to_string())
        .map_err(|e| TransportError::SendFailed {
            to: reply.to.to_string(),
            reason: format!("Failed to build email: {e}"),
        })
}

/// Send via SMTP. Blocking; callers run it under `spawn_blocking`.
///
/// Port 465 uses implicit TLS; anything else upgrades with STARTTLS.
fn send_smtp(config: &MailConfig, email: &Message) -> Result<(), String> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let builder = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| format!("SMTP relay error: {e}"))?;

    let transport = builder
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(SOCKET_TIMEOUT))
        .build();

    transport
        .send(email)
        .map_err(|e| format!("SMTP send failed: {e}"))?;
    Ok(())
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse a raw RFC 822 message. `None` if it is not a parseable message.
pub fn parse_message(raw: &[u8]) -> Option<MailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(MailMessage {
        message_id: parsed.message_id().and_then(threading::normalize_message_id),
        in_reply_to: header_ids(parsed.in_reply_to()).into_iter().next(),
        references: header_ids(parsed.references()),
        from,
        to: extract_addresses(parsed.to()),
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: extract_text(&parsed),
        received_at,
    })
}

/// Message-ids from an `In-Reply-To` / `References` header value.
fn header_ids(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Text(id) => threading::parse_references(id),
        HeaderValue::TextList(ids) => ids
            .iter()
            .filter_map(|id| threading::normalize_message_id(id))
            .collect(),
        _ => Vec::new(),
    }
}

/// Readable body text with quoted history removed.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return strip_quoted_text(&text);
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return strip_quoted_text(text);
        }
    }
    String::new()
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP fetch operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Tagged response: untagged lines, literal payloads, and the final status.
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    ok: bool,
    status: String,
}

/// Minimal synchronous IMAP session over TLS.
struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &MailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))?;
        tcp.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        tcp.set_write_timeout(Some(SOCKET_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };
        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(format!("unexpected IMAP greeting: {}", greeting.trim_end()).into());
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err("IMAP connection closed".into());
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send one command and collect its response, reading literals whole.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        IoWrite::write_all(stream, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(stream)?;

        let mut response = ImapResponse {
            lines: Vec::new(),
            literals: Vec::new(),
            ok: false,
            status: String::new(),
        };

        loop {
            let line = self.read_line()?;
            if let Some(rest) = line.strip_prefix(&tag).and_then(|r| r.strip_prefix(' ')) {
                response.ok = rest.starts_with("OK");
                response.status = rest.trim_end().to_string();
                return Ok(response);
            }
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn expect_ok(&mut self, cmd: &str, what: &str) -> Result<ImapResponse, ImapError> {
        let response = self.command(cmd)?;
        if !response.ok {
            return Err(format!("IMAP {what} failed: {}", response.status).into());
        }
        Ok(response)
    }
}

/// Fetch messages dated at or after `since` from `folder` (blocking).
///
/// A message the server refuses or that will not parse is reported in
/// `failures`; the rest of the folder is still returned.
fn fetch_folder_imap(
    config: &MailConfig,
    folder: &str,
    since: DateTime<Utc>,
) -> Result<FetchedMail, ImapError> {
    let mut session = ImapSession::connect(config)?;

    session.expect_ok(
        &format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        ),
        "login",
    )?;

    session.expect_ok(&format!("EXAMINE {}", imap_quote(folder)), "examine")?;

    // SEARCH SINCE is day-granular; exact filtering happens after parsing.
    let search = session.expect_ok(&format!("SEARCH SINCE {}", imap_date(since)), "search")?;
    let ids = search_ids(&search.lines);
    debug!(folder, candidates = ids.len(), "IMAP search complete");

    let mut fetched = FetchedMail {
        messages: Vec::with_capacity(ids.len()),
        failures: Vec::new(),
    };
    for id in &ids {
        let fetch = session.command(&format!("FETCH {id} RFC822"))?;
        collect_fetch(folder, id, &fetch, since, &mut fetched);
    }

    let _ = session.command("LOGOUT");
    Ok(fetched)
}

/// Sort one `FETCH` response into parsed messages or failures.
fn collect_fetch(
    folder: &str,
    id: &str,
    fetch: &ImapResponse,
    since: DateTime<Utc>,
    fetched: &mut FetchedMail,
) {
    let mut failure = if !fetch.ok {
        Some(format!("FETCH failed: {}", fetch.status))
    } else if fetch.literals.is_empty() {
        Some("FETCH returned no message body".to_string())
    } else {
        None
    };

    if failure.is_none() {
        for raw in &fetch.literals {
            match parse_message(raw) {
                Some(message) if message.received_at >= since => fetched.messages.push(message),
                Some(_) => {}
                None => failure = Some("unparseable message".into()),
            }
        }
    }

    if let Some(reason) = failure {
        warn!(folder, id, reason = %reason, "Message skipped");
        fetched.failures.push(FetchFailure {
            folder: folder.to_string(),
            id: id.to_string(),
            reason,
        });
    }
}

/// Sequence numbers from `* SEARCH` lines.
fn search_ids(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// Size of a `{N}` literal announced at the end of a response line.
fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// IMAP date for `SEARCH SINCE`, e.g. `7-Mar-2026`.
fn imap_date(at: DateTime<Utc>) -> String {
    at.format("%-d-%b-%Y").to_string()
}

/// Quote an IMAP string argument.
fn imap_quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Threading headers a reply would carry, for display in review.
pub fn describe_threading(headers: &ThreadingHeaders) -> String {
    match headers.in_reply_to_header() {
        Some(parent) => format!("in reply to {parent}"),
        None => "new thread".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RAW: &str = "From: Ann Lee <ann@x.org>\r\n\
        To: Me <me@y.org>, other@z.org\r\n\
        Subject: Re: Budget\r\n\
        Date: Tue, 14 Oct 2025 09:30:00 +0000\r\n\
        Message-ID: <m3@x.org>\r\n\
        In-Reply-To: <m2@y.org>\r\n\
        References: <m1@x.org> <m2@y.org>\r\n\
        \r\n\
        Can we finalize by Friday?\r\n\
        \r\n\
        On Mon, Oct 13, 2025 at 10:00 AM Me <me@y.org> wrote:\r\n\
        > Draft attached.\r\n";

    #[test]
    fn parses_header_triad_and_body() {
        let msg = parse_message(RAW.as_bytes()).unwrap();
        assert_eq!(msg.message_id.as_deref(), Some("m3@x.org"));
        assert_eq!(msg.in_reply_to.as_deref(), Some("m2@y.org"));
        assert_eq!(msg.references, vec!["m1@x.org", "m2@y.org"]);
        assert_eq!(msg.from, "Ann Lee <ann@x.org>");
        assert_eq!(msg.to, vec!["me@y.org", "other@z.org"]);
        assert_eq!(msg.subject, "Re: Budget");
        assert_eq!(msg.body, "Can we finalize by Friday?");
        assert_eq!(
            msg.received_at,
            Utc.with_ymd_and_hms(2025, 10, 14, 9, 30, 0).unwrap()
        );
    }

    fn fetch_response(ok: bool, status: &str, literals: Vec<Vec<u8>>) -> ImapResponse {
        ImapResponse {
            lines: vec![],
            literals,
            ok,
            status: status.into(),
        }
    }

    #[test]
    fn refused_fetch_is_recorded_as_failure() {
        let since = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let mut fetched = FetchedMail::default();

        collect_fetch("INBOX", "7", &fetch_response(true, "A4 OK", vec![RAW.as_bytes().to_vec()]), since, &mut fetched);
        collect_fetch("INBOX", "8", &fetch_response(false, "A5 NO [UNAVAILABLE] try later", vec![]), since, &mut fetched);
        collect_fetch("INBOX", "9", &fetch_response(true, "A6 OK", vec![]), since, &mut fetched);

        assert_eq!(fetched.messages.len(), 1);
        let failed: Vec<&str> = fetched.failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["8", "9"]);
        assert!(fetched.failures[0].reason.contains("UNAVAILABLE"));
        assert_eq!(fetched.failures[0].folder, "INBOX");
    }

    #[test]
    fn message_older_than_window_is_dropped_not_failed() {
        let since = Utc.with_ymd_and_hms(2025, 10, 15, 0, 0, 0).unwrap();
        let mut fetched = FetchedMail::default();
        collect_fetch("INBOX", "1", &fetch_response(true, "A4 OK", vec![RAW.as_bytes().to_vec()]), since, &mut fetched);
        assert!(fetched.messages.is_empty());
        assert!(fetched.failures.is_empty());
    }

    #[test]
    fn parsed_reply_resolves_to_thread_root() {
        let msg = parse_message(RAW.as_bytes()).unwrap();
        assert_eq!(threading::resolve(&msg).as_str(), "mid:m1@x.org");
    }

    #[test]
    fn literal_size_parses_fetch_line() {
        assert_eq!(literal_size("* 3 FETCH (RFC822 {1234}\r\n"), Some(1234));
        assert_eq!(literal_size("* 3 FETCH (FLAGS (\\Seen))\r\n"), None);
    }

    #[test]
    fn search_ids_collects_all_lines() {
        let lines = vec!["* SEARCH 2 5 9\r\n".to_string(), "* SEARCH\r\n".to_string()];
        assert_eq!(search_ids(&lines), vec!["2", "5", "9"]);
    }

    #[test]
    fn imap_date_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        assert_eq!(imap_date(at), "7-Mar-2026");
    }

    #[test]
    fn imap_quote_escapes() {
        assert_eq!(imap_quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
        assert_eq!(imap_quote("[Gmail]/Sent Mail"), "\"[Gmail]/Sent Mail\"");
    }

    #[test]
    fn reply_carries_threading_headers() {
        let headers = ThreadingHeaders {
            in_reply_to: Some("m3@x.org".into()),
            references: vec!["m1@x.org".into(), "m3@x.org".into()],
        };
        let email = build_reply(
            "me@y.org",
            OutgoingReply {
                to: "ann@x.org",
                subject: "Re: Budget",
                body: "Friday works.",
                headers: &headers,
            },
        )
        .unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("In-Reply-To: <m3@x.org>"));
        assert!(formatted.contains("References: <m1@x.org> <m3@x.org>"));
        assert!(formatted.contains("Subject: Re: Budget"));
    }

    #[test]
    fn fresh_thread_reply_has_no_threading_headers() {
        let headers = ThreadingHeaders::default();
        let email = build_reply(
            "me@y.org",
            OutgoingReply {
                to: "ann@x.org",
                subject: "Re: Hello",
                body: "Hi",
                headers: &headers,
            },
        )
        .unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(!formatted.contains("In-Reply-To"));
        assert!(!formatted.contains("References"));
        assert_eq!(describe_threading(&headers), "new thread");
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let headers = ThreadingHeaders::default();
        let err = build_reply(
            "me@y.org",
            OutgoingReply {
                to: "not an address",
                subject: "Re: x",
                body: "x",
                headers: &headers,
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }
}
