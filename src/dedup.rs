//! Dedup index: the set of conversations already answered.
//!
//! Built once at run start from the sent folder and the history log, then
//! only read for the rest of the run.

use std::collections::HashSet;

use crate::channels::email_types::MailMessage;
use crate::pipeline::types::TriageRecord;
use crate::store::{HistoryEntry, Outcome};
use crate::threading::{self, ConversationKey};

/// Answered conversation keys plus individually skipped messages.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    answered: HashSet<ConversationKey>,
    skipped_messages: HashSet<String>,
}

impl DedupIndex {
    /// Union of sent-folder keys and keys with a `sent` history entry.
    ///
    /// `skipped` entries don't mark the conversation answered; they only
    /// suppress the exact message whose draft was skipped.
    pub fn build(
        sent_keys: impl IntoIterator<Item = ConversationKey>,
        history: &[HistoryEntry],
    ) -> Self {
        let mut answered: HashSet<ConversationKey> = sent_keys.into_iter().collect();
        let mut skipped_messages = HashSet::new();

        for entry in history {
            match entry.outcome {
                Outcome::Sent => {
                    answered.insert(entry.key.clone());
                }
                Outcome::Skipped => {
                    if let Some(id) = &entry.message_id {
                        skipped_messages.insert(id.clone());
                    }
                }
            }
        }

        Self {
            answered,
            skipped_messages,
        }
    }

    /// `true` if the conversation has been answered.
    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.answered.contains(key)
    }

    /// `true` if this exact message's draft was skipped in an earlier review.
    pub fn is_dismissed(&self, message: &MailMessage) -> bool {
        !self.skipped_messages.is_empty()
            && self
                .skipped_messages
                .contains(&threading::message_identity(message))
    }

    /// Whether a needs-response record has already been dealt with.
    pub fn is_consumed(&self, record: &TriageRecord) -> bool {
        self.contains(&record.key) || self.is_dismissed(&record.message)
    }

    pub fn answered_len(&self) -> usize {
        self.answered.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::threading;

    fn message(id: &str, in_reply_to: Option<&str>) -> MailMessage {
        MailMessage {
            message_id: Some(id.into()),
            in_reply_to: in_reply_to.map(String::from),
            references: vec![],
            from: "ann@x.org".into(),
            to: vec!["me@x.org".into()],
            subject: "Plan".into(),
            body: String::new(),
            received_at: Utc::now(),
        }
    }

    fn history(key: &ConversationKey, outcome: Outcome, message_id: &str) -> HistoryEntry {
        HistoryEntry {
            key: key.clone(),
            outcome,
            message_id: Some(message_id.into()),
            subject: "Plan".into(),
            sender: "ann@x.org".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn sent_history_marks_key_answered() {
        let first = message("m1", Some("root"));
        let key = threading::resolve(&first);
        let index = DedupIndex::build([], &[history(&key, Outcome::Sent, "m1")]);

        // A later message in the same thread is still a duplicate.
        let later = message("m2", Some("root"));
        assert!(index.contains(&threading::resolve(&later)));
    }

    #[test]
    fn sent_folder_keys_mark_key_answered() {
        let msg = message("m1", Some("root"));
        let index = DedupIndex::build([threading::resolve(&msg)], &[]);
        assert!(index.contains(&threading::resolve(&msg)));
        assert_eq!(index.answered_len(), 1);
    }

    #[test]
    fn skip_suppresses_only_the_skipped_message() {
        let first = message("m1", Some("root"));
        let key = threading::resolve(&first);
        let index = DedupIndex::build([], &[history(&key, Outcome::Skipped, "m1")]);

        assert!(!index.contains(&key));
        assert!(index.is_dismissed(&first));
        assert!(!index.is_dismissed(&message("m2", Some("root"))));
    }

    #[test]
    fn message_without_id_is_dismissed_by_content_identity() {
        let mut msg = message("m1", None);
        msg.message_id = None;
        let key = threading::resolve(&msg);
        let identity = threading::message_identity(&msg);
        let index = DedupIndex::build([], &[history(&key, Outcome::Skipped, &identity)]);
        assert!(index.is_dismissed(&msg));

        // Same conversation, different arrival: still surfaces.
        let mut later = msg.clone();
        later.received_at += chrono::Duration::minutes(5);
        assert!(!index.is_dismissed(&later));
    }
}
