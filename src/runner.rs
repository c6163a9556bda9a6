//! Run orchestration: one triage or review pass with its own dedup index.
//!
//! Each pass rebuilds the `DedupIndex` at start from the sent folder and the
//! history log, then hands it by reference to the engine for the whole run.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::TriageConfig;
use crate::dedup::DedupIndex;
use crate::error::Error;
use crate::llm::{LlmProvider, MeteredProvider};
use crate::pipeline::review::{ReviewLoop, ReviewSummary, Reviewer};
use crate::pipeline::{Classifier, DraftEngine, MailTransport, RulesEngine, TriageEngine, TriageReport};
use crate::report;
use crate::store::{HistoryLog, NeedsResponseSnapshot, NeedsResponseStore};

/// Everything a run needs, built once at startup.
pub struct Runner {
    config: TriageConfig,
    transport: Arc<dyn MailTransport>,
    llm: Arc<MeteredProvider>,
    rules: RulesEngine,
    store: NeedsResponseStore,
    history: HistoryLog,
}

impl Runner {
    /// `own_address` is the account's address; its mail is never triaged.
    pub fn new(
        config: TriageConfig,
        transport: Arc<dyn MailTransport>,
        llm: Arc<dyn LlmProvider>,
        own_address: &str,
    ) -> Self {
        let rules = if config.skip_automated {
            RulesEngine::default_rules()
        } else {
            RulesEngine::empty()
        }
        .with_own_address(own_address);

        Self {
            store: NeedsResponseStore::new(config.needs_response_path()),
            history: HistoryLog::new(config.history_path()),
            llm: Arc::new(MeteredProvider::new(llm)),
            config,
            transport,
            rules,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    fn classifier(&self) -> Classifier {
        Classifier::new(self.llm.clone())
    }

    /// Build the dedup index from the sent folder and history.
    ///
    /// Fails on a corrupt history file or an unreachable sent folder.
    pub async fn build_index(&self) -> Result<DedupIndex, Error> {
        let history = self.history.load().await?;
        let since = Utc::now() - self.config.sent_lookback;
        let sent_keys = self.transport.list_sent_keys(since).await?;

        let index = DedupIndex::build(sent_keys, &history);
        info!(
            history_entries = history.len(),
            answered = index.answered_len(),
            "Dedup index built"
        );
        Ok(index)
    }

    /// Triage the lookback window and write the report.
    ///
    /// `lookback` overrides the configured window.
    pub async fn triage(&self, lookback: Option<Duration>) -> Result<TriageReport, Error> {
        let span = info_span!("triage_run", run_id = %Uuid::new_v4());
        async {
            let index = self.build_index().await?;
            let since = Utc::now() - lookback.unwrap_or(self.config.lookback);

            let classifier = self.classifier();
            let engine = TriageEngine::new(&*self.transport, &classifier, &self.rules, &self.store);
            let result = engine.run(since, &index).await;
            self.llm.log_summary();
            let triage = result?;

            report::write_report(&self.config.report_path(), &triage.records).await?;
            Ok(triage)
        }
        .instrument(span)
        .await
    }

    /// Review the persisted needs-response set.
    pub async fn review(&self, reviewer: &mut dyn Reviewer) -> Result<ReviewSummary, Error> {
        let span = info_span!("review_run", run_id = %Uuid::new_v4());
        async {
            let snapshot = self.store.load().await?;
            let index = self.build_index().await?;

            let drafts = DraftEngine::new(self.classifier(), self.config.signature.clone());
            let review = ReviewLoop::new(&*self.transport, &drafts, &self.history);
            let result = review.run(&snapshot.records, &index, reviewer).await;
            self.llm.log_summary();
            result
        }
        .instrument(span)
        .await
    }

    /// The persisted needs-response set, as last written.
    pub async fn snapshot(&self) -> Result<NeedsResponseSnapshot, Error> {
        Ok(self.store.load().await?)
    }
}
