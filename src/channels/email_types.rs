//! Email-specific types: the fetched `MailMessage`, quote stripping, address extraction.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches the bracketed address in `Display Name <user@example.com>`.
static BRACKETED_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>").expect("static regex is valid")
});

/// A fetched message with the header triad needed for threading.
///
/// Immutable once fetched; everything downstream borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Message-ID header, without angle brackets.
    #[serde(default)]
    pub message_id: Option<String>,
    /// In-Reply-To header, without angle brackets.
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// References chain, oldest first, without angle brackets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    /// Raw From header (may include a display name).
    pub from: String,
    /// To recipients (bare addresses).
    #[serde(default)]
    pub to: Vec<String>,
    /// Subject line, empty when absent.
    #[serde(default)]
    pub subject: String,
    /// Plain-text body.
    #[serde(default)]
    pub body: String,
    /// Date header, or fetch time when the header is missing.
    pub received_at: DateTime<Utc>,
}

impl MailMessage {
    /// Bare lowercase address of the sender, or the lowercased raw From when
    /// no address can be found.
    pub fn sender_address(&self) -> String {
        extract_address(&self.from)
    }

    /// Identifier used in logs and user-facing reports.
    pub fn display_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or("(no message-id)")
    }

    /// Whether the message carries any threading header at all.
    pub fn has_threading_headers(&self) -> bool {
        self.message_id.is_some() || self.in_reply_to.is_some() || !self.references.is_empty()
    }
}

/// Extract a bare lowercase address from a header value like `Ann <ann@x.org>`.
pub fn extract_address(raw: &str) -> String {
    if let Some(caps) = BRACKETED_ADDRESS.captures(raw) {
        return caps[1].trim().to_lowercase();
    }
    raw.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase()
}

/// Strip quoted text from an email body.
///
/// Removes:
/// - Lines starting with `>` (quoted reply lines)
/// - "On ... wrote:" attribution lines and everything after
/// - "--- Original Message ---" separators and everything after
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        // "On Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:"
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract email addresses from an optional mail_parser Address field.
///
/// Returns an empty vec if the address is None.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_lowercase()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_lowercase()))
            })
            .collect(),
    }
}

/// Truncate to at most `max` characters without splitting a char.
pub fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── extract_address tests ───────────────────────────────────

    #[test]
    fn address_from_display_name_form() {
        assert_eq!(extract_address("Ann Lee <Ann.Lee@Example.org>"), "ann.lee@example.org");
    }

    #[test]
    fn address_bare() {
        assert_eq!(extract_address("  bob@example.com "), "bob@example.com");
    }

    #[test]
    fn address_bracketed_only() {
        assert_eq!(extract_address("<carol@example.com>"), "carol@example.com");
    }

    #[test]
    fn address_empty_stays_empty() {
        assert_eq!(extract_address(""), "");
    }

    // ── strip_quoted_text tests ─────────────────────────────────

    #[test]
    fn strip_basic_quoted_lines() {
        let body = "Hello!\n\n> This is quoted\n> Another quoted line\nThanks";
        assert_eq!(strip_quoted_text(body), "Hello!\n\nThanks");
    }

    #[test]
    fn strip_on_wrote_attribution() {
        let body = "Sounds good!\n\nOn Mon, Jan 1, 2026 at 10:00 AM Alice <alice@ex.com> wrote:\n> Original message";
        assert_eq!(strip_quoted_text(body), "Sounds good!");
    }

    #[test]
    fn strip_original_message_separator() {
        let body = "My reply\n\n--- Original Message ---\nOld stuff here";
        assert_eq!(strip_quoted_text(body), "My reply");
    }

    #[test]
    fn strip_no_quotes() {
        let body = "Just a normal message\nWith multiple lines";
        assert_eq!(strip_quoted_text(body), body);
    }

    // ── HTML stripping tests ────────────────────────────────────

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
    }

    #[test]
    fn strip_html_whitespace_normalized() {
        assert_eq!(strip_html("<p>  Hello   World  </p>"), "Hello World");
    }

    // ── MailMessage tests ───────────────────────────────────────

    #[test]
    fn mail_message_deserializes_without_optional_headers() {
        let json = r#"{
            "from": "Alice <alice@example.com>",
            "subject": "Lunch?",
            "body": "Are you free?",
            "received_at": "2026-02-15T10:00:00Z"
        }"#;
        let msg: MailMessage = serde_json::from_str(json).unwrap();
        assert!(msg.message_id.is_none());
        assert!(msg.references.is_empty());
        assert!(!msg.has_threading_headers());
        assert_eq!(msg.sender_address(), "alice@example.com");
        assert_eq!(msg.display_id(), "(no message-id)");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
    }
}
