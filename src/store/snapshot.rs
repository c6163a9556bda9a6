//! Needs-response snapshot: replaced wholesale at the end of each triage run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::PersistenceError;
use crate::pipeline::types::TriageRecord;

/// On-disk shape of the needs-response set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeedsResponseSnapshot {
    pub last_updated: Option<DateTime<Utc>>,
    pub records: Vec<TriageRecord>,
}

/// File-backed needs-response set.
#[derive(Debug, Clone)]
pub struct NeedsResponseStore {
    path: PathBuf,
}

impl NeedsResponseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current snapshot. Missing file → empty; unparseable → error.
    pub async fn load(&self) -> Result<NeedsResponseSnapshot, PersistenceError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No needs-response snapshot yet");
                return Ok(NeedsResponseSnapshot::default());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
            path: self.path.clone(),
            line: e.line(),
            reason: e.to_string(),
        })
    }

    /// Replace the snapshot: write a temp file, then rename over the target.
    pub async fn replace(&self, records: &[TriageRecord]) -> Result<(), PersistenceError> {
        let snapshot = SnapshotRef {
            last_updated: Utc::now(),
            records,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        // Flush the temp file to disk before the rename makes it visible.
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await.map_err(write_err)?;
        file.write_all(json.as_bytes()).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).await.map_err(write_err)?;

        debug!(
            path = %self.path.display(),
            records = records.len(),
            "Needs-response snapshot replaced"
        );
        Ok(())
    }
}

/// Borrowing twin of `NeedsResponseSnapshot` so saving doesn't clone records.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    last_updated: DateTime<Utc>,
    records: &'a [TriageRecord],
}
