//! Classifier adapter: the fixed contract in front of the text-generation backend.
//!
//! Two calls: `classify` turns a message into a strict `Classification`,
//! `generate_reply` produces a reply body (optionally revising a previous
//! draft). The adapter never guesses: missing or mistyped fields in the
//! model's JSON fail closed with `ClassificationError::Malformed`.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::channels::email_types::{MailMessage, preview};
use crate::error::ClassificationError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Classification, Importance};

/// Max tokens for the classification call (runs on every candidate message).
const CLASSIFY_MAX_TOKENS: u32 = 512;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.1;

const DRAFT_MAX_TOKENS: u32 = 800;
const DRAFT_TEMPERATURE: f32 = 0.4;

/// Body characters shown to the classifier.
const CLASSIFY_BODY_CHARS: usize = 4000;

/// Body characters shown when drafting.
const DRAFT_BODY_CHARS: usize = 1000;

/// A previous draft plus the reviewer's instruction for revising it.
#[derive(Debug, Clone, Copy)]
pub struct Revision<'a> {
    pub previous_body: &'a str,
    pub instruction: &'a str,
}

/// Adapter over an `LlmProvider`.
#[derive(Clone)]
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Classify one message. Exactly one backend call.
    pub async fn classify(
        &self,
        message: &MailMessage,
    ) -> Result<Classification, ClassificationError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(message)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;

        parse_classification(&response.content).inspect_err(|e| {
            warn!(
                id = %message.display_id(),
                raw_response = %response.content,
                error = %e,
                "Failed to parse classification"
            );
        })
    }

    /// Generate a reply body for `message`, ending with `signature`.
    ///
    /// With a `revision`, the previous draft and the reviewer's instruction
    /// are included so the model rewrites rather than starting over.
    pub async fn generate_reply(
        &self,
        message: &MailMessage,
        signature: &str,
        revision: Option<Revision<'_>>,
    ) -> Result<String, ClassificationError> {
        let user_prompt = match revision {
            None => build_draft_prompt(message, signature),
            Some(rev) => build_revision_prompt(message, signature, rev),
        };

        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are a professional, concise email responder who crafts helpful, \
                 direct responses to business inquiries.",
            ),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(DRAFT_TEMPERATURE)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let body = clean_draft_body(&response.content);

        if body.is_empty() {
            return Err(ClassificationError::EmptyDraft {
                message_id: message.display_id().to_string(),
            });
        }

        debug!(
            id = %message.display_id(),
            chars = body.len(),
            revised = revision.is_some(),
            "Draft generated"
        );
        Ok(body)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classify_system_prompt() -> String {
    "You are an executive assistant who helps a busy professional prioritize email. \
     You are EXTREMELY selective about which messages truly need a personal reply. \
     Your goal is to minimize noise and only surface mail that must be dealt with.\n\n\
     Only mark a message as needing a response if it is:\n\
     1. From a real person (not an automated system)\n\
     2. Personalized (not mass marketing)\n\
     3. Asking for specific action or input from the recipient\n\
     4. Of clear business value, substantial opportunity, or time-sensitive importance\n\n\
     Automated notifications, newsletters and marketing are ALWAYS \"needs_response\": false.\n\n\
     Importance:\n\
     - \"high\": personalized, clear value, or time-sensitive matters that must be addressed\n\
     - \"medium\": potentially useful but less critical\n\
     - \"low\": mass marketing, newsletters, automated notifications, spam\n\n\
     Respond with ONLY a JSON object:\n\
     {\"needs_response\": true|false, \"importance\": \"high\"|\"medium\"|\"low\", \
     \"category\": \"<short label, e.g. client request, scheduling, personal>\", \
     \"reason\": \"<one sentence>\", \"time_sensitive\": true|false, \
     \"topics\": [\"<1-3 key topics>\"]}"
        .to_string()
}

fn build_classify_user_prompt(message: &MailMessage) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!("From: {}\n", message.from));
    prompt.push_str(&format!("Received: {}\n", message.received_at.to_rfc3339()));
    if message.has_threading_headers() {
        prompt.push_str("Signals: part of an existing thread\n");
    }
    prompt.push_str(&format!(
        "\nBody:\n{}",
        preview(message.body.trim(), CLASSIFY_BODY_CHARS)
    ));
    prompt
}

fn build_draft_prompt(message: &MailMessage, signature: &str) -> String {
    format!(
        "Write a concise and helpful reply to the following email.\n\n\
         Subject: {subject}\n\
         From: {from}\n\
         Body:\n{body}\n\n\
         Requirements:\n\
         1. Friendly but brief and to the point\n\
         2. Address any specific questions or requests in the email\n\
         3. Professional and helpful\n\
         4. Under 150 words\n\
         5. Don't apologize for delay unless clearly necessary\n\
         6. End with \"{signature}\"\n\n\
         Return ONLY the reply body. No subject line, no commentary.",
        subject = message.subject,
        from = message.from,
        body = preview(message.body.trim(), DRAFT_BODY_CHARS),
    )
}

fn build_revision_prompt(message: &MailMessage, signature: &str, revision: Revision<'_>) -> String {
    format!(
        "Rewrite the reply below following the instructions.\n\n\
         Original email:\n\
         Subject: {subject}\n\
         From: {from}\n\
         Body:\n{body}\n\n\
         Current draft:\n{draft}\n\n\
         Instructions: {instruction}\n\n\
         Keep it under 150 words and end with \"{signature}\".\n\
         Return ONLY the reply body. No subject line, no commentary.",
        subject = message.subject,
        from = message.from,
        body = preview(message.body.trim(), DRAFT_BODY_CHARS / 2),
        draft = revision.previous_body,
        instruction = revision.instruction.trim(),
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Wire shape of the classifier's JSON. Required fields have no default.
#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    needs_response: bool,
    importance: Importance,
    category: String,
    reason: String,
    #[serde(default)]
    time_sensitive: bool,
    #[serde(default)]
    topics: Vec<String>,
}

/// Parse the model output into a `Classification`, failing closed.
fn parse_classification(raw: &str) -> Result<Classification, ClassificationError> {
    let value = extract_json_object(raw)?;
    let response: ClassificationResponse =
        serde_json::from_value(value).map_err(|e| ClassificationError::Malformed {
            reason: format!("JSON parse error: {e}"),
        })?;

    Ok(Classification {
        important: response.needs_response,
        importance: response.importance,
        category: response.category.trim().to_string(),
        rationale: response.reason.trim().to_string(),
        time_sensitive: response.time_sensitive,
        topics: response.topics,
    })
}

/// Take the first JSON value starting at the first `{` of the model output.
///
/// Markdown fences, leading prose, trailing prose and any second object are
/// ignored; only the first complete value is read.
fn extract_json_object(text: &str) -> Result<serde_json::Value, ClassificationError> {
    let start = text.find('{').ok_or_else(|| ClassificationError::Malformed {
        reason: "no JSON object in response".into(),
    })?;
    serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<serde_json::Value>()
        .next()
        .ok_or_else(|| ClassificationError::Malformed {
            reason: "no JSON object in response".into(),
        })?
        .map_err(|e| ClassificationError::Malformed {
            reason: format!("JSON parse error: {e}"),
        })
}

/// Trim model chatter around a draft: a leading `Subject:` line or code fence.
fn clean_draft_body(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```") {
        // Drop an optional language tag on the fence line.
        let inner = inner.split_once('\n').map_or("", |(_, rest)| rest);
        text = inner.trim_end().strip_suffix("```").unwrap_or(inner).trim();
    }
    if let Some(first) = text.lines().next()
        && first.trim_start().to_ascii_lowercase().starts_with("subject:")
    {
        text = text[first.len()..].trim_start();
    }
    text.trim().to_string()
}
