//! Review loop: human approval over each draft.
//!
//! **Core invariant: no reply is sent without an explicit approve.**
//!
//! Per draft:
//! ```text
//! Presented ──approve (send ok)──▶ Sent       (history: sent)
//! Presented ──approve (send err)─▶ Presented  (error reported)
//! Presented ──decline / skip────▶ Skipped    (history: skipped)
//! Presented ──edit──────────────▶ Editing ──▶ Presented (new body, same key)
//! Presented ──quit / EOF────────▶ run interrupted, draft left Presented
//! ```
//! History is appended on every terminal transition and nowhere else.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dedup::DedupIndex;
use crate::error::Error;
use crate::pipeline::draft::DraftEngine;
use crate::pipeline::types::{DraftRecord, MailTransport, TriageRecord};
use crate::store::{HistoryEntry, HistoryLog, Outcome};
use crate::threading;

const DECISION_PROMPT: &str = "Send this reply? [y]es / [n]o / [e]dit / [s]kip / [q]uit: ";
const EDIT_PROMPT: &str = "How should the reply change? ";

/// One reviewer choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
    /// Revise the draft; the instruction may be given inline.
    Edit(Option<String>),
    Skip,
    Quit,
}

/// Parse one line of reviewer input. `None` for anything unrecognized.
pub fn parse_decision(input: &str) -> Option<Decision> {
    let trimmed = input.trim();
    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    };

    let decision = match word.to_ascii_lowercase().as_str() {
        "y" | "yes" | "approve" | "send" => Decision::Approve,
        "n" | "no" | "decline" => Decision::Decline,
        "e" | "edit" => Decision::Edit((!rest.is_empty()).then(|| rest.to_string())),
        "s" | "skip" => Decision::Skip,
        "q" | "quit" | "exit" => Decision::Quit,
        _ => return None,
    };

    // Only edit takes an argument.
    if !rest.is_empty() && !matches!(decision, Decision::Edit(_)) {
        return None;
    }
    Some(decision)
}

/// Review state of the draft currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewState {
    Presented,
    Editing { instruction: Option<String> },
    Sent,
    Skipped,
}

impl ReviewState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Skipped)
    }
}

/// The interactive surface the loop talks to.
#[async_trait]
pub trait Reviewer: Send {
    /// Show a draft and the message it answers.
    fn present(&mut self, record: &TriageRecord, draft: &DraftRecord);

    /// Ask for one line of input. `None` at end of input.
    async fn prompt(&mut self, prompt: &str) -> Option<String>;

    /// Tell the reviewer about a recovered error or status change.
    fn notify(&mut self, message: &str);
}

/// Totals for one review run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub sent: usize,
    pub skipped: usize,
    /// Send attempts that failed (the draft stayed presented).
    pub send_failures: usize,
    /// Records whose draft could not be generated; left for the next run.
    pub draft_failures: usize,
    /// Records already sent or skipped in an earlier run.
    pub already_handled: usize,
    /// The reviewer quit before every draft reached a terminal state.
    pub interrupted: bool,
}

pub struct ReviewLoop<'a> {
    transport: &'a dyn MailTransport,
    drafts: &'a DraftEngine,
    history: &'a HistoryLog,
}

impl<'a> ReviewLoop<'a> {
    pub fn new(
        transport: &'a dyn MailTransport,
        drafts: &'a DraftEngine,
        history: &'a HistoryLog,
    ) -> Self {
        Self {
            transport,
            drafts,
            history,
        }
    }

    /// Review every unconsumed record in order.
    ///
    /// Recovered failures (draft generation, send) are reported and counted;
    /// a history write failure is fatal.
    pub async fn run(
        &self,
        records: &[TriageRecord],
        index: &DedupIndex,
        reviewer: &mut dyn Reviewer,
    ) -> Result<ReviewSummary, Error> {
        let mut summary = ReviewSummary::default();

        for record in records {
            if index.is_consumed(record) {
                debug!(key = %record.key, "Already handled, not drafting");
                summary.already_handled += 1;
                continue;
            }

            let mut draft = match self.drafts.draft(record).await {
                Ok(draft) => draft,
                Err(e) => {
                    warn!(
                        id = %record.message.display_id(),
                        key = %record.key,
                        error = %e,
                        "Draft generation failed"
                    );
                    reviewer.notify(&format!(
                        "Could not draft a reply to \"{}\" ({}): {e}",
                        record.message.subject,
                        record.message.display_id()
                    ));
                    summary.draft_failures += 1;
                    continue;
                }
            };

            match self.review_one(record, &mut draft, reviewer, &mut summary).await? {
                ReviewState::Sent => summary.sent += 1,
                ReviewState::Skipped => summary.skipped += 1,
                _ => {
                    summary.interrupted = true;
                    info!(key = %record.key, "Review interrupted");
                    break;
                }
            }
        }

        info!(
            sent = summary.sent,
            skipped = summary.skipped,
            send_failures = summary.send_failures,
            draft_failures = summary.draft_failures,
            already_handled = summary.already_handled,
            interrupted = summary.interrupted,
            "Review run complete"
        );
        Ok(summary)
    }

    /// Drive one draft until it reaches a terminal state or the reviewer quits.
    ///
    /// Returns the final state; `Presented` means interrupted.
    async fn review_one(
        &self,
        record: &TriageRecord,
        draft: &mut DraftRecord,
        reviewer: &mut dyn Reviewer,
        summary: &mut ReviewSummary,
    ) -> Result<ReviewState, Error> {
        let mut state = ReviewState::Presented;

        while !state.is_terminal() {
            state = match state {
                ReviewState::Presented => {
                    reviewer.present(record, draft);
                    let Some(line) = reviewer.prompt(DECISION_PROMPT).await else {
                        return Ok(ReviewState::Presented);
                    };
                    match parse_decision(&line) {
                        None => {
                            reviewer.notify("Please answer y, n, e, s or q.");
                            ReviewState::Presented
                        }
                        Some(Decision::Quit) => return Ok(ReviewState::Presented),
                        Some(Decision::Approve) => {
                            self.approve(record, draft, reviewer, summary).await?
                        }
                        Some(Decision::Decline) | Some(Decision::Skip) => {
                            self.record(record, draft, Outcome::Skipped).await?;
                            reviewer.notify("Skipped.");
                            ReviewState::Skipped
                        }
                        Some(Decision::Edit(instruction)) => ReviewState::Editing { instruction },
                    }
                }
                ReviewState::Editing { instruction } => {
                    let instruction = match instruction {
                        Some(i) => i,
                        None => match reviewer.prompt(EDIT_PROMPT).await {
                            Some(i) => i,
                            None => return Ok(ReviewState::Presented),
                        },
                    };
                    self.edit(record, draft, instruction.trim(), reviewer).await;
                    ReviewState::Presented
                }
                terminal => terminal,
            };
        }

        Ok(state)
    }

    async fn approve(
        &self,
        record: &TriageRecord,
        draft: &DraftRecord,
        reviewer: &mut dyn Reviewer,
        summary: &mut ReviewSummary,
    ) -> Result<ReviewState, Error> {
        match self.transport.send(draft.outgoing()).await {
            Ok(()) => {
                info!(key = %draft.key, to = %draft.to, "Reply sent");
                self.record(record, draft, Outcome::Sent).await?;
                reviewer.notify(&format!("Sent to {}.", draft.to));
                Ok(ReviewState::Sent)
            }
            Err(e) => {
                warn!(key = %draft.key, to = %draft.to, error = %e, "Send failed");
                reviewer.notify(&format!(
                    "Send failed for \"{}\": {e}. You can retry, edit or skip.",
                    draft.subject
                ));
                summary.send_failures += 1;
                Ok(ReviewState::Presented)
            }
        }
    }

    /// Regenerate the body. On failure the previous body stays.
    async fn edit(
        &self,
        record: &TriageRecord,
        draft: &mut DraftRecord,
        instruction: &str,
        reviewer: &mut dyn Reviewer,
    ) {
        if instruction.is_empty() {
            reviewer.notify("No instructions given; keeping the current draft.");
            return;
        }
        match self.drafts.revise(record, draft, instruction).await {
            Ok(body) => {
                debug!(key = %draft.key, "Draft revised");
                draft.revise(body);
            }
            Err(e) => {
                warn!(key = %draft.key, error = %e, "Draft revision failed");
                reviewer.notify(&format!("Could not revise the draft: {e}. Keeping the current one."));
            }
        }
    }

    async fn record(
        &self,
        record: &TriageRecord,
        draft: &DraftRecord,
        outcome: Outcome,
    ) -> Result<(), Error> {
        let entry = HistoryEntry {
            key: draft.key.clone(),
            outcome,
            message_id: Some(threading::message_identity(&record.message)),
            subject: record.message.subject.clone(),
            sender: record.message.sender_address(),
            recorded_at: Utc::now(),
        };
        self.history.append(&entry).await?;
        Ok(())
    }
}
