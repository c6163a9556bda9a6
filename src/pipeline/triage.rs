//! Triage engine: fetch, dedup-check, classify, persist.
//!
//! Flow per run:
//! 1. Fetch the lookback window (fatal on failure; nothing is written)
//! 2. Resolve each message's conversation key; answered keys skip classification
//! 3. Pre-classifier rules may discard automated or self-sent mail
//! 4. Classify; unimportant messages are dropped
//! 5. Replace the needs-response snapshot with this run's records
//!
//! A single message's classification failure is recorded and the run goes on.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dedup::DedupIndex;
use crate::error::Error;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::types::{MailTransport, TriageRecord, TriageReport, Unclassified};
use crate::store::NeedsResponseStore;
use crate::threading;

pub struct TriageEngine<'a> {
    transport: &'a dyn MailTransport,
    classifier: &'a Classifier,
    rules: &'a RulesEngine,
    store: &'a NeedsResponseStore,
}

impl<'a> TriageEngine<'a> {
    pub fn new(
        transport: &'a dyn MailTransport,
        classifier: &'a Classifier,
        rules: &'a RulesEngine,
        store: &'a NeedsResponseStore,
    ) -> Self {
        Self {
            transport,
            classifier,
            rules,
            store,
        }
    }

    /// Run one triage pass over mail received at or after `since`.
    ///
    /// `index` is built by the caller at run start and only read here.
    pub async fn run(
        &self,
        since: DateTime<Utc>,
        index: &DedupIndex,
    ) -> Result<TriageReport, Error> {
        let fetched = self.transport.fetch_since(since).await?;
        let messages = fetched.messages;
        info!(
            count = messages.len(),
            failed = fetched.failures.len(),
            since = %since,
            "Fetched candidate messages"
        );

        let mut report = TriageReport {
            fetched: messages.len(),
            fetch_failures: fetched.failures,
            ..TriageReport::default()
        };

        for message in messages {
            let key = threading::resolve(&message);

            if index.contains(&key) || index.is_dismissed(&message) {
                debug!(id = %message.display_id(), key = %key, "Already handled, skipping");
                report.duplicates += 1;
                continue;
            }

            if let Some(reason) = self.rules.evaluate(&message) {
                debug!(id = %message.display_id(), reason = %reason, "Discarded by rules");
                report.filtered += 1;
                continue;
            }

            let classification = match self.classifier.classify(&message).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        id = %message.display_id(),
                        key = %key,
                        error = %e,
                        "Classification failed, will retry next run"
                    );
                    report.unclassified.push(Unclassified {
                        message_id: message.display_id().to_string(),
                        key,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if !classification.important {
                debug!(
                    id = %message.display_id(),
                    category = %classification.category,
                    "Not important"
                );
                report.not_important += 1;
                continue;
            }

            info!(
                id = %message.display_id(),
                key = %key,
                importance = classification.importance.label(),
                "Needs response"
            );

            let record = TriageRecord {
                key,
                message,
                classification,
                triaged_at: Utc::now(),
            };

            // One record per conversation; the later message wins.
            match report.records.iter_mut().find(|r| r.key == record.key) {
                Some(existing) => *existing = record,
                None => report.records.push(record),
            }
        }

        self.store.replace(&report.records).await?;

        info!(
            fetched = report.fetched,
            needs_response = report.records.len(),
            duplicates = report.duplicates,
            filtered = report.filtered,
            not_important = report.not_important,
            unclassified = report.unclassified.len(),
            fetch_failures = report.fetch_failures.len(),
            "Triage run complete"
        );
        Ok(report)
    }
}
