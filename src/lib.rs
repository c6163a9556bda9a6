//! reply-triage: decide which mail needs a reply, draft it, and send it in-thread.

pub mod channels;
pub mod config;
pub mod dedup;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod store;
pub mod threading;
