//! Persistence layer: JSON state files for the needs-response set and history.

pub mod history;
pub mod snapshot;

pub use history::{HistoryEntry, HistoryLog, Outcome};
pub use snapshot::{NeedsResponseSnapshot, NeedsResponseStore};
