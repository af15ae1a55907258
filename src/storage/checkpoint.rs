//! Per-category checkpoints and the final merge

use crate::storage::{
    read_json, remove_if_exists, write_json_atomic, RecordMap, StorageError, StorageResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CHECKPOINT_EXTENSION: &str = "checkpoint";

/// The final state of one category
///
/// Besides the records, a checkpoint keeps what a resumed run needs to
/// rebuild the registry as the original run had it: whether the category
/// was skipped (its records never entered the registry) and its page count
/// (its rank in the scout order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub skipped: bool,

    #[serde(default = "default_page_count")]
    pub page_count: u32,

    pub records: RecordMap,
}

fn default_page_count() -> u32 {
    1
}

impl Checkpoint {
    /// A crawled single-page category
    pub fn new(records: RecordMap) -> Self {
        Self {
            skipped: false,
            page_count: default_page_count(),
            records,
        }
    }
}

/// Directory of `{category}.checkpoint` files
///
/// Presence of a checkpoint is what marks the category complete; nothing in
/// memory is trusted across a restart.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint for `category`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidCategory`] unless the slug is made of
    /// ASCII alphanumerics, `-` and `_` only.
    pub fn path(&self, category: &str) -> StorageResult<PathBuf> {
        validate_slug(category)?;
        Ok(self
            .dir
            .join(format!("{}.{}", category, CHECKPOINT_EXTENSION)))
    }

    pub fn exists(&self, category: &str) -> bool {
        self.path(category).map(|p| p.exists()).unwrap_or(false)
    }

    /// Atomically writes the checkpoint of a finished category
    pub fn write(&self, category: &str, checkpoint: &Checkpoint) -> StorageResult<()> {
        let path = self.path(category)?;
        write_json_atomic(&path, checkpoint)?;
        tracing::debug!(
            "Checkpointed {} ({} records{}) to {}",
            category,
            checkpoint.records.len(),
            if checkpoint.skipped { ", skipped" } else { "" },
            path.display()
        );
        Ok(())
    }

    pub fn read(&self, category: &str) -> StorageResult<Checkpoint> {
        read_json(&self.path(category)?)
    }

    /// Lists checkpoint files, sorted by file name
    fn files(&self) -> StorageResult<Vec<(String, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }

        files.sort();
        Ok(files)
    }

    /// Names of every category with a checkpoint
    pub fn completed(&self) -> StorageResult<Vec<String>> {
        Ok(self.files()?.into_iter().map(|(name, _)| name).collect())
    }

    /// Loads every checkpoint, keyed by category
    pub fn load_all(&self) -> StorageResult<BTreeMap<String, Checkpoint>> {
        self.files()?
            .into_iter()
            .map(|(name, path)| -> StorageResult<(String, Checkpoint)> {
                Ok((name, read_json(&path)?))
            })
            .collect()
    }

    /// Deletes every checkpoint file, returning how many were removed
    pub fn delete_all(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for (_, path) in self.files()? {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn validate_slug(category: &str) -> StorageResult<()> {
    let valid = !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidCategory(category.to_string()))
    }
}

/// Unions checkpoint maps into one deduplicated record map
///
/// The first occurrence of an identifier wins. When `max_results` is set the
/// result keeps the first `max_results` identifiers in sorted order, so the
/// outcome does not depend on the order checkpoints are supplied in.
pub fn merge_checkpoints<'a, I>(checkpoints: I, max_results: Option<usize>) -> RecordMap
where
    I: IntoIterator<Item = &'a RecordMap>,
{
    let mut merged = RecordMap::new();
    for records in checkpoints {
        for (identifier, record) in records {
            merged
                .entry(identifier.clone())
                .or_insert_with(|| record.clone());
        }
    }

    if let Some(cap) = max_results {
        if merged.len() > cap {
            tracing::info!("Truncating {} merged records to {}", merged.len(), cap);
            merged = merged.into_iter().take(cap).collect();
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::ListingRecord;
    use tempfile::TempDir;

    fn records(ids: &[&str]) -> RecordMap {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    ListingRecord::new(*id, format!("https://p.example.com/{}.html", id)),
                )
            })
            .collect()
    }

    #[test]
    fn test_write_and_read_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));

        assert!(!store.exists("tax-law"));
        let checkpoint = Checkpoint {
            skipped: true,
            page_count: 4,
            records: records(&["a", "b"]),
        };
        store.write("tax-law", &checkpoint).unwrap();
        assert!(store.exists("tax-law"));
        assert_eq!(store.read("tax-law").unwrap(), checkpoint);
        assert_eq!(store.completed().unwrap(), vec!["tax-law"]);
    }

    #[test]
    fn test_checkpoint_flags_default_when_absent() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::write(dir.path().join("tax.checkpoint"), r#"{"records": {}}"#).unwrap();

        let checkpoint = store.read("tax").unwrap();
        assert!(!checkpoint.skipped);
        assert_eq!(checkpoint.page_count, 1);
    }

    #[test]
    fn test_invalid_slug_rejected() {
        let store = CheckpointStore::new("/tmp/unused");
        assert!(matches!(
            store.path("../etc/passwd"),
            Err(StorageError::InvalidCategory(_))
        ));
        assert!(store.path("").is_err());
        assert!(store.path("family_law-2").is_ok());
    }

    #[test]
    fn test_missing_dir_has_no_checkpoints() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent"));
        assert!(store.completed().unwrap().is_empty());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_other_files_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.write("tax", &Checkpoint::new(records(&["a"]))).unwrap();
        std::fs::write(dir.path().join("tax.checkpoint.tmp"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.completed().unwrap(), vec!["tax"]);
    }

    #[test]
    fn test_delete_all() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.write("a", &Checkpoint::new(records(&["1"]))).unwrap();
        store.write("b", &Checkpoint::new(records(&["2"]))).unwrap();

        assert_eq!(store.delete_all().unwrap(), 2);
        assert!(store.completed().unwrap().is_empty());
    }

    #[test]
    fn test_merge_first_occurrence_wins() {
        let mut first = records(&["x"]);
        first.get_mut("x").unwrap().name = "First".to_string();
        let mut second = records(&["x", "y"]);
        second.get_mut("x").unwrap().name = "Second".to_string();

        let merged = merge_checkpoints([&first, &second], None);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["x"].name, "First");
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = records(&["1", "2", "3"]);
        let b = records(&["3", "4"]);
        let c = records(&["5", "1"]);

        let forward = merge_checkpoints([&a, &b, &c], None);
        let backward = merge_checkpoints([&c, &b, &a], None);
        let shuffled = merge_checkpoints([&b, &a, &c], None);

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.len(), 5);

        let capped_a = merge_checkpoints([&a, &b, &c], Some(3));
        let capped_b = merge_checkpoints([&c, &a, &b], Some(3));
        assert_eq!(capped_a, capped_b);
        assert_eq!(
            capped_a.keys().cloned().collect::<Vec<_>>(),
            vec!["1", "2", "3"]
        );
    }
}
