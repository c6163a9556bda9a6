//! Append-only response history (JSON Lines).
//!
//! One `HistoryEntry` per line. Entries are never rewritten or removed. A
//! missing file is an empty history; an unparseable line is corruption and
//! fails the load, because silently dropping it could lose a `sent` record
//! and re-surface an answered conversation.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::PersistenceError;
use crate::threading::ConversationKey;

/// Terminal outcome of a reviewed draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Sent,
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One terminal review outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: ConversationKey,
    pub outcome: Outcome,
    /// Identity of the message the draft answered: its Message-ID, or a
    /// content hash for mail without one.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    pub recorded_at: DateTime<Utc>,
}

/// File-backed append-only history log.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every entry. Missing file → empty; corrupt line → error.
    pub async fn load(&self) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No history yet");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: HistoryEntry =
                serde_json::from_str(line).map_err(|e| PersistenceError::Corrupt {
                    path: self.path.clone(),
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Append one entry with a single write, flushed to disk before returning.
    pub async fn append(&self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        debug!(key = %entry.key, outcome = %entry.outcome, "History entry appended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, outcome: Outcome) -> HistoryEntry {
        HistoryEntry {
            key: serde_json::from_value(serde_json::json!(key)).unwrap(),
            outcome,
            message_id: Some(format!("{key}-msg")),
            subject: "Plan".into(),
            sender: "ann@x.org".into(),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("history.jsonl"));
        assert!(log.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("nested/history.jsonl"));

        log.append(&entry("mid:a", Outcome::Sent)).await.unwrap();
        log.append(&entry("mid:b", Outcome::Skipped)).await.unwrap();

        let entries = log.load().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key.as_str(), "mid:a");
        assert_eq!(entries[0].outcome, Outcome::Sent);
        assert_eq!(entries[1].outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn corrupt_line_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let good = serde_json::to_string(&entry("mid:a", Outcome::Sent)).unwrap();
        std::fs::write(&path, format!("{good}\n{{not json\n")).unwrap();

        let err = HistoryLog::new(&path).load().await.unwrap_err();
        match err {
            PersistenceError::Corrupt { line, .. } => assert_eq!(line, 2),
            other => panic!("Expected Corrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let good = serde_json::to_string(&entry("mid:a", Outcome::Sent)).unwrap();
        std::fs::write(&path, format!("\n{good}\n\n")).unwrap();

        assert_eq!(HistoryLog::new(&path).load().await.unwrap().len(), 1);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Outcome::Skipped).unwrap(), "\"skipped\"");
    }
}
