//! Triage pipeline: classify, dedup, draft, review.
//!
//! Data flows one way: fetch → classify → dedup-filter → persist
//! needs-response set → draft → review → send/skip → append history.

pub mod classifier;
pub mod draft;
pub mod review;
pub mod rules;
pub mod triage;
pub mod types;

pub use classifier::Classifier;
pub use draft::DraftEngine;
pub use review::{Decision, ReviewLoop, ReviewState, ReviewSummary, Reviewer, parse_decision};
pub use rules::RulesEngine;
pub use triage::TriageEngine;
pub use types::{
    Classification, DraftRecord, FetchFailure, FetchedMail, Importance, MailTransport,
    OutgoingReply, TriageRecord, TriageReport, Unclassified,
};
