use crate::storage::{read_json, write_json_atomic, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Final state of one identifier in the detail pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailStatus {
    /// Document fetched and written
    Success,

    /// Every channel failed, or the record has no detail URL
    Failed,

    /// Document already on disk
    Skipped,
}

impl fmt::Display for DetailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Number of identifiers in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped
    }
}

/// The cumulative `fetch_status.json` map
///
/// Advisory only: which documents exist on disk decides what is left to
/// fetch. A missing or unreadable file therefore starts an empty log.
#[derive(Debug)]
pub struct StatusLog {
    path: PathBuf,
    entries: BTreeMap<String, DetailStatus>,
}

impl StatusLog {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match read_json(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable status file: {}", e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, identifier: impl Into<String>, status: DetailStatus) {
        self.entries.insert(identifier.into(), status);
    }

    pub fn get(&self, identifier: &str) -> Option<DetailStatus> {
        self.entries.get(identifier).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for status in self.entries.values() {
            match status {
                DetailStatus::Success => counts.success += 1,
                DetailStatus::Failed => counts.failed += 1,
                DetailStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Rewrites the whole map atomically
    pub fn save(&self) -> StorageResult<()> {
        write_json_atomic(&self.path, &self.entries)
    }
}

impl From<StatusLog> for BTreeMap<String, DetailStatus> {
    fn from(log: StatusLog) -> Self {
        log.entries
    }
}

/// Reads a status file strictly, for reporting
pub fn read_status_counts(path: &Path) -> StorageResult<Option<StatusCounts>> {
    if !path.exists() {
        return Ok(None);
    }
    let entries: BTreeMap<String, DetailStatus> = read_json(path)?;
    let log = StatusLog {
        path: path.to_path_buf(),
        entries,
    };
    Ok(Some(log.counts()))
}
