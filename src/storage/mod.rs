//! Storage module for persisting crawl data
//!
//! Everything a run produces lives under one data directory and is plain
//! JSON or raw HTML on disk. The filesystem is the only source of truth for
//! "is this unit of work done": a category is complete when its checkpoint
//! exists, a record's detail is fetched when its document exists.
//!
//! All writes go through [`write_atomic`] (temp file + rename), so a crash
//! never leaves a half-written artifact behind.

mod checkpoint;

pub use checkpoint::{merge_checkpoints, Checkpoint, CheckpointStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::listing::ListingRecord;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt JSON in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid category slug: {0:?}")]
    InvalidCategory(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Records keyed by identifier, the shape of checkpoints and `listings.json`
pub type RecordMap = BTreeMap<String, ListingRecord>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Paths of every artifact inside one data directory
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn listings_path(&self) -> PathBuf {
        self.root.join("listings.json")
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    /// Raw detail document for one identifier
    pub fn doc_path(&self, identifier: &str) -> PathBuf {
        self.docs_dir().join(format!("{}.doc", identifier))
    }

    pub fn fetch_status_path(&self) -> PathBuf {
        self.root.join("fetch_status.json")
    }

    pub fn crawl_summary_path(&self) -> PathBuf {
        self.root.join("crawl_summary.json")
    }

    /// Creates the data directory and its subdirectories
    pub fn ensure(&self) -> StorageResult<()> {
        for dir in [self.root.clone(), self.checkpoint_dir(), self.docs_dir()] {
            std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        }
        Ok(())
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.checkpoint_dir())
    }
}

/// Writes `contents` to `path` atomically
///
/// The data is written to a sibling `.tmp` file which is then renamed over
/// the destination. Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).map_err(io_error(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_error(path))?;
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// Reads and deserializes a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let bytes = std::fs::read(path).map_err(io_error(path))?;
    serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Removes a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path)(e)),
    }
}
