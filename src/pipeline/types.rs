//! Shared types for the triage pipeline.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::email_types::MailMessage;
use crate::error::TransportError;
use crate::threading::{self, ConversationKey, ThreadingHeaders};

// ── Classification ──────────────────────────────────────────────────

/// Importance label from the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    /// Short label for logging and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Structured classifier verdict for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Whether the message genuinely needs a human reply.
    pub important: bool,
    pub importance: Importance,
    /// Short free-form category (e.g. "client request", "scheduling").
    pub category: String,
    pub rationale: String,
    #[serde(default)]
    pub time_sensitive: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

// ── Records ─────────────────────────────────────────────────────────

/// A message classified as needing a reply and not yet answered.
///
/// Created only by the triage engine; immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageRecord {
    pub key: ConversationKey,
    pub message: MailMessage,
    pub classification: Classification,
    pub triaged_at: DateTime<Utc>,
}

/// A candidate reply awaiting review.
///
/// Only the review loop's edit transition replaces `body`; everything else
/// is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub key: ConversationKey,
    /// Message-id of the message being answered.
    /// Recipient address.
    pub to: String,
    pub subject: String,
    pub body: String,
    pub headers: ThreadingHeaders,
}

impl DraftRecord {
    /// Replace the body, keeping key and headers.
    pub fn revise(&mut self, body: String) {
        self.body = body;
    }

    /// The outbound message this draft sends.
    pub fn outgoing(&self) -> OutgoingReply<'_> {
        OutgoingReply {
            to: &self.to,
            subject: &self.subject,
            body: &self.body,
            headers: &self.headers,
        }
    }
}

/// What the send collaborator receives.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingReply<'a> {
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub headers: &'a ThreadingHeaders,
}

// ── Triage run report ───────────────────────────────────────────────

/// A message the mailbox listed but could not deliver as a parseable message.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub folder: String,
    /// Server-side id (IMAP sequence number).
    pub id: String,
    pub reason: String,
}

/// Result of an inbox fetch: parsed messages plus per-message failures.
#[derive(Debug, Clone, Default)]
pub struct FetchedMail {
    pub messages: Vec<MailMessage>,
    pub failures: Vec<FetchFailure>,
}

impl From<Vec<MailMessage>> for FetchedMail {
    fn from(messages: Vec<MailMessage>) -> Self {
        Self {
            messages,
            failures: Vec::new(),
        }
    }
}

/// A message whose classification failed this run.
#[derive(Debug, Clone)]
pub struct Unclassified {
    pub message_id: String,
    pub key: ConversationKey,
    pub error: String,
}

/// Outcome of one triage run.
#[derive(Debug, Clone, Default)]
pub struct TriageReport {
    /// Messages returned by the fetch.
    pub fetched: usize,
    /// Listed by the mailbox but not retrievable; reconsidered next run.
    pub fetch_failures: Vec<FetchFailure>,
    /// Skipped because the conversation is already answered.
    pub duplicates: usize,
    /// Discarded by pre-classification rules (automated or self-sent mail).
    pub filtered: usize,
    /// Classified as not needing a reply.
    pub not_important: usize,
    /// Classification failed; reconsidered next run.
    pub unclassified: Vec<Unclassified>,
    /// The needs-response set that was persisted.
    pub records: Vec<TriageRecord>,
}

// ── Mail transport trait ────────────────────────────────────────────

/// Mailbox collaborator: pure I/O, no business logic.
///
/// Fetching and sending live here; classification, dedup and review
/// decisions live in the pipeline.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Inbox messages received at or after `since`, in mailbox order.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<FetchedMail, TransportError>;

    /// Sent-folder messages dated at or after `since`.
    async fn fetch_sent_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<MailMessage>, TransportError>;

    /// Conversation keys answered from the sent folder since `since`.
    async fn list_sent_keys(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashSet<ConversationKey>, TransportError> {
        let sent = self.fetch_sent_since(since).await?;
        Ok(sent.iter().flat_map(threading::sent_keys).collect())
    }

    /// Send an approved reply.
    ///
    /// Called only from the review loop after an explicit approval.
    async fn send(&self, reply: OutgoingReply<'_>) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_orders_high_first() {
        let mut labels = vec![Importance::Low, Importance::High, Importance::Medium];
        labels.sort();
        assert_eq!(labels, vec![Importance::High, Importance::Medium, Importance::Low]);
    }

    #[test]
    fn classification_serialization_omits_empty_topics() {
        let c = Classification {
            important: true,
            importance: Importance::High,
            category: "client request".into(),
            rationale: "Direct question from a client".into(),
            time_sensitive: false,
            topics: vec![],
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["importance"], "high");
        assert!(json.get("topics").is_none());
    }

    #[test]
    fn draft_revise_keeps_key_and_headers() {
        let mut draft = DraftRecord {
            key: serde_json::from_value(serde_json::json!("mid:abc")).unwrap(),
            to: "ann@x.org".into(),
            subject: "Re: Plan".into(),
            body: "first".into(),
            headers: ThreadingHeaders {
                in_reply_to: Some("abc".into()),
                references: vec!["abc".into()],
            },
        };
        let before = draft.clone();
        draft.revise("second".into());
        assert_eq!(draft.body, "second");
        assert_eq!(draft.key, before.key);
        assert_eq!(draft.headers, before.headers);
        assert_eq!(draft.outgoing().body, "second");
    }
}
