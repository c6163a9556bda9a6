//! Draft engine: reply bodies plus the headers that thread them.

use tracing::info;

use crate::error::ClassificationError;
use crate::pipeline::classifier::{Classifier, Revision};
use crate::pipeline::types::{DraftRecord, TriageRecord};
use crate::threading;

pub struct DraftEngine {
    classifier: Classifier,
    signature: String,
}

impl DraftEngine {
    pub fn new(classifier: Classifier, signature: impl Into<String>) -> Self {
        Self {
            classifier,
            signature: signature.into(),
        }
    }

    /// Produce a draft for a needs-response record.
    ///
    /// Headers come from the source message: `In-Reply-To` is its id and
    /// `References` its chain plus that id. A source with no message-id
    /// yields a fresh-thread reply.
    pub async fn draft(&self, record: &TriageRecord) -> Result<DraftRecord, ClassificationError> {
        let source = &record.message;
        let body = self
            .classifier
            .generate_reply(source, &self.signature, None)
            .await?;

        let headers = threading::reply_headers(source);
        if headers.is_fresh_thread() {
            info!(
                key = %record.key,
                "Source has no threading headers; reply will start a new thread"
            );
        }

        Ok(DraftRecord {
            key: record.key.clone(),
            to: source.sender_address(),
            subject: threading::reply_subject(&source.subject),
            body,
            headers,
        })
    }

    /// Regenerate the body of `draft` following the reviewer's instruction.
    ///
    /// Returns the new body; the caller applies it with `DraftRecord::revise`.
    pub async fn revise(
        &self,
        record: &TriageRecord,
        draft: &DraftRecord,
        instruction: &str,
    ) -> Result<String, ClassificationError> {
        self.classifier
            .generate_reply(
                &record.message,
                &self.signature,
                Some(Revision {
                    previous_body: &draft.body,
                    instruction,
                }),
            )
            .await
    }
}
