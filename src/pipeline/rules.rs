//! Pre-classifier rules engine for fast pattern matching.
//!
//! Runs before the classifier to discard obvious automated mail without
//! spending a classification call:
//! - noreply/no-reply senders
//! - mailer-daemon / postmaster bounces
//! - GitHub notification bot
//! - Marketing/newsletter sender domains
//! - "Unsubscribe" subjects and bulk unsubscribe footers
//!
//! Mail sent by the account itself is always discarded, even with the
//! automated-mail rules disabled.

use regex::Regex;
use tracing::debug;

use crate::channels::email_types::{MailMessage, extract_address};

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy)]
pub enum RuleField {
    Sender,
    Subject,
    Body,
}

/// A single discard rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Human-readable pattern description.
    pub pattern: String,
    pub regex: Regex,
    pub field: RuleField,
    /// Why this rule triggers.
    pub reason: String,
}

/// Pre-classifier rules engine.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    ignore_rules: Vec<IgnoreRule>,
    /// Account address; mail from it is never triaged.
    own_address: Option<String>,
}

fn builtin(pattern: &str, regex: &str, field: RuleField, reason: &str) -> IgnoreRule {
    IgnoreRule {
        pattern: pattern.into(),
        regex: Regex::new(regex).expect("builtin rule regex is valid"),
        field,
        reason: reason.into(),
    }
}

impl RulesEngine {
    /// Rules engine with the default automated-mail patterns.
    pub fn default_rules() -> Self {
        let ignore_rules = vec![
            builtin(
                "noreply@*",
                r"(?i)^no[\-_.]?reply@",
                RuleField::Sender,
                "noreply sender",
            ),
            builtin(
                "mailer-daemon",
                r"(?i)^(mailer[\-_]?daemon|postmaster)@",
                RuleField::Sender,
                "automated mail system",
            ),
            builtin(
                "notifications@github.com",
                r"(?i)^notifications@github\.com$",
                RuleField::Sender,
                "GitHub notification",
            ),
            builtin(
                "*@marketing.*",
                r"(?i)@(marketing|newsletter|promo|campaign)\b",
                RuleField::Sender,
                "marketing/newsletter sender",
            ),
            builtin(
                "unsubscribe in subject",
                r"(?i)\bunsubscribe\b",
                RuleField::Subject,
                "newsletter (unsubscribe in subject)",
            ),
            builtin(
                "unsubscribe footer",
                r"(?i)(click here to unsubscribe|unsubscribe from (these|this|our) (emails|list|mailing)|manage your subscription|email preferences)",
                RuleField::Body,
                "bulk email (unsubscribe footer)",
            ),
        ];

        Self {
            ignore_rules,
            ..Self::default()
        }
    }

    /// Rules engine with no automated-mail patterns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Discard mail from this address (self-loop prevention).
    pub fn with_own_address(mut self, address: &str) -> Self {
        let address = extract_address(address);
        self.own_address = (!address.is_empty()).then_some(address);
        self
    }

    /// Evaluate a message against all rules.
    ///
    /// Returns `Some(reason)` if the message should be discarded without
    /// classification, `None` to fall through to the classifier.
    pub fn evaluate(&self, message: &MailMessage) -> Option<String> {
        let sender = message.sender_address();

        if self.own_address.as_deref() == Some(sender.as_str()) {
            debug!(id = %message.display_id(), "Message sent by this account");
            return Some("sent by this account".into());
        }

        for rule in &self.ignore_rules {
            let field_value = match rule.field {
                RuleField::Sender => sender.as_str(),
                RuleField::Subject => message.subject.as_str(),
                RuleField::Body => message.body.as_str(),
            };

            if rule.regex.is_match(field_value) {
                debug!(
                    sender = %sender,
                    rule = %rule.pattern,
                    reason = %rule.reason,
                    "Message matched ignore rule"
                );
                return Some(rule.reason.clone());
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_message(from: &str, subject: &str, body: &str) -> MailMessage {
        MailMessage {
            message_id: Some("test-1@x".into()),
            in_reply_to: None,
            references: vec![],
            from: from.into(),
            to: vec!["me@example.com".into()],
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn ignores_noreply() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("Service <noreply@company.com>", "Your account", "Welcome!");
        assert_eq!(engine.evaluate(&msg).as_deref(), Some("noreply sender"));
    }

    #[test]
    fn ignores_no_dash_reply() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("no-reply@service.io", "Update", "Info");
        assert!(engine.evaluate(&msg).is_some());
    }

    #[test]
    fn ignores_mailer_daemon() {
        let engine = RulesEngine::default_rules();
        let msg = make_message("MAILER-DAEMON@mx.example.com", "Undeliverable", "Bounce");
        assert!(engine.evaluate(&msg).is_some());
    }

    #[test]
    fn ignores_unsubscribe_footer() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "updates@service.com",
            "Product update",
            "New features!\n\nClick here to unsubscribe from these emails.",
        );
        assert!(engine.evaluate(&msg).is_some());
    }

    #[test]
    fn ignores_github_notifications() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "GitHub <notifications@github.com>",
            "Re: PR #42",
            "User commented on your PR",
        );
        assert_eq!(engine.evaluate(&msg).as_deref(), Some("GitHub notification"));
    }

    #[test]
    fn passes_through_legitimate_email() {
        let engine = RulesEngine::default_rules();
        let msg = make_message(
            "Alice <alice@company.com>",
            "Meeting tomorrow",
            "Hey, can we reschedule the 3pm meeting?",
        );
        assert!(engine.evaluate(&msg).is_none());
    }

    #[test]
    fn self_sent_mail_is_discarded_even_when_rules_are_off() {
        let engine = RulesEngine::empty().with_own_address("Me <Me@Example.com>");
        let msg = make_message("me@example.com", "Note to self", "Remember milk");
        assert_eq!(engine.evaluate(&msg).as_deref(), Some("sent by this account"));
    }

    #[test]
    fn empty_engine_passes_automated_mail() {
        let engine = RulesEngine::empty();
        let msg = make_message("noreply@company.com", "Receipt", "Thanks");
        assert!(engine.evaluate(&msg).is_none());
    }
}
