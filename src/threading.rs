//! Thread identity: conversation keys and outgoing threading headers.
//!
//! Key derivation order: root of `References` > `In-Reply-To` > a hash of
//! the normalized subject and sender. Derivation is pure: the same header
//! triad always yields the same key.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::channels::email_types::{MailMessage, extract_address};

/// Reply/forward prefixes stripped from subjects before keying.
const SUBJECT_PREFIXES: &[&str] = &["re:", "fwd:", "fw:"];

/// Normalized identifier grouping messages into one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Key for a thread rooted at a message-id.
    fn from_message_id(id: &str) -> Self {
        Self(format!("mid:{id}"))
    }

    /// Key for a header-less message, from its subject and counterpart address.
    pub fn from_subject_and_sender(subject: &str, sender: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_subject(subject).as_bytes());
        hasher.update(b"\n");
        hasher.update(extract_address(sender).as_bytes());
        Self(format!("subj:{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the conversation key for a fetched message. Never fails.
pub fn resolve(message: &MailMessage) -> ConversationKey {
    if let Some(root) = message.references.iter().find_map(|r| normalize_message_id(r)) {
        return ConversationKey::from_message_id(&root);
    }
    if let Some(parent) = message.in_reply_to.as_deref().and_then(normalize_message_id) {
        return ConversationKey::from_message_id(&parent);
    }
    ConversationKey::from_subject_and_sender(&message.subject, &message.from)
}

/// Keys a message in the sent folder answers.
///
/// A reply we sent carries the thread's headers, so its own resolved key
/// matches the thread. A reply to a header-less message can only be matched
/// by subject, so the subject/recipient key is added for every recipient.
pub fn sent_keys(message: &MailMessage) -> Vec<ConversationKey> {
    let mut keys = Vec::with_capacity(message.to.len() + 1);
    if message.in_reply_to.is_some() || !message.references.is_empty() {
        keys.push(resolve(message));
    }
    for recipient in &message.to {
        let key = ConversationKey::from_subject_and_sender(&message.subject, recipient);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Headers an outgoing reply carries to attach to its conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadingHeaders {
    /// Message-id of the message being answered, without angle brackets.
    pub in_reply_to: Option<String>,
    /// Full references chain, oldest first, without angle brackets.
    pub references: Vec<String>,
}

impl ThreadingHeaders {
    /// `true` when the reply would start a new top-level thread.
    pub fn is_fresh_thread(&self) -> bool {
        self.in_reply_to.is_none() && self.references.is_empty()
    }

    /// `In-Reply-To` header value, bracketed.
    pub fn in_reply_to_header(&self) -> Option<String> {
        self.in_reply_to.as_deref().map(bracket)
    }

    /// `References` header value, bracketed and space-separated.
    pub fn references_header(&self) -> Option<String> {
        if self.references.is_empty() {
            return None;
        }
        Some(
            self.references
                .iter()
                .map(|r| bracket(r))
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// Compute the threading headers for a reply to `source`.
///
/// `In-Reply-To` is the source's message-id; `References` is the source's
/// chain with the source's message-id appended. A source with `In-Reply-To`
/// but no `References` seeds the chain with its parent (RFC 5322 3.6.4), so
/// the reply resolves to the same conversation key as the source.
pub fn reply_headers(source: &MailMessage) -> ThreadingHeaders {
    let mut references: Vec<String> = source
        .references
        .iter()
        .filter_map(|r| normalize_message_id(r))
        .collect();
    if references.is_empty()
        && let Some(parent) = source.in_reply_to.as_deref().and_then(normalize_message_id)
    {
        references.push(parent);
    }
    let in_reply_to = source.message_id.as_deref().and_then(normalize_message_id);
    if let Some(ref id) = in_reply_to
        && references.last() != Some(id)
    {
        references.push(id.clone());
    }
    ThreadingHeaders {
        in_reply_to,
        references,
    }
}

/// Identity of one fetched message: its Message-ID, or a content hash when
/// the header is missing. Used to dismiss exactly one skipped message.
pub fn message_identity(message: &MailMessage) -> String {
    if let Some(id) = message.message_id.as_deref().and_then(normalize_message_id) {
        return id;
    }
    let mut hasher = Sha256::new();
    hasher.update(resolve(message).as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(message.sender_address().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_subject(&message.subject).as_bytes());
    hasher.update(b"\n");
    hasher.update(message.received_at.to_rfc3339().as_bytes());
    format!("hash:{:x}", hasher.finalize())
}

/// Subject for a reply: a single `Re: ` prefix.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: (no subject)".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Strip reply/forward prefixes, collapse whitespace, lowercase.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    'strip: loop {
        for prefix in SUBJECT_PREFIXES {
            if rest
                .get(..prefix.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(prefix))
            {
                rest = rest[prefix.len()..].trim_start();
                continue 'strip;
            }
        }
        break;
    }
    rest.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trim whitespace and angle brackets; `None` when nothing is left.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let id = raw
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Split a raw `References` header into message-ids.
pub fn parse_references(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(normalize_message_id)
        .collect()
}

fn bracket(id: &str) -> String {
    format!("<{id}>")
}
