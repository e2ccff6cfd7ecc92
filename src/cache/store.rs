//! Fingerprint-keyed store of completed task instances.
//!
//! Each successful instance leaves a `.manifest.json` in its work
//! directory; the directory path itself encodes the fingerprint
//! (`<root>/<2-char shard>/<62-char remainder>`). A lookup is a hit only
//! when the manifest parses and every recorded output file still exists,
//! so a half-deleted directory degrades to a miss rather than an error.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::execution::Fingerprint;

/// Manifest file name inside a completed work directory.
pub const MANIFEST_FILE: &str = ".manifest.json";

/// Everything recorded about a successfully completed instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hex fingerprint, duplicated here for manifest readability.
    pub fingerprint: String,
    /// Task name the instance belonged to.
    pub task: String,
    /// Exit code (always zero; only successes are recorded).
    pub exit_code: i32,
    /// Matched output files per port, relative to the work directory.
    pub outputs: Vec<(String, Vec<PathBuf>)>,
    /// The rendered command, for inspection.
    pub command: String,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed cache rooted at the run's work directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Work directory assigned to a fingerprint, sharded by its first
    /// two hex characters.
    pub fn work_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        let (shard, rest) = fingerprint.dir_key();
        self.root.join(shard).join(rest)
    }

    /// Looks up a prior success. Missing, stale or unreadable manifests
    /// are misses.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let work_dir = self.work_dir(fingerprint);
        let manifest_path = work_dir.join(MANIFEST_FILE);

        let text = match fs::read_to_string(&manifest_path) {
            Ok(text) => text,
            Err(_) => return None,
        };
        let entry: CacheEntry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    "Ignoring unreadable manifest {}: {}",
                    manifest_path.display(),
                    e
                );
                return None;
            }
        };

        for (port, files) in &entry.outputs {
            for file in files {
                if !work_dir.join(file).exists() {
                    warn!(
                        "Cache entry for '{}' invalid: output '{}' on port '{}' is gone",
                        entry.task,
                        file.display(),
                        port
                    );
                    return None;
                }
            }
        }

        debug!(
            "Cache hit for '{}' at {}",
            entry.task,
            fingerprint.short()
        );
        Some(entry)
    }

    /// Records a success. The manifest is the last file written, so an
    /// interrupted run never leaves a directory that looks complete.
    pub fn record(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        let work_dir = self.work_dir(fingerprint);
        let manifest_path = work_dir.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(entry)?;
        fs::write(&manifest_path, text)?;
        info!(
            "Recorded '{}' at {}",
            entry.task,
            fingerprint.short()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Item;
    use crate::workflow::TaskDescriptor;
    use tempfile::tempdir;

    fn fingerprint() -> Fingerprint {
        let desc = TaskDescriptor::new("t", "echo {n}").unwrap();
        Fingerprint::compute(&desc, &[Item::Int(1)])
    }

    fn entry(fp: &Fingerprint, outputs: Vec<(String, Vec<PathBuf>)>) -> CacheEntry {
        CacheEntry {
            fingerprint: fp.to_hex(),
            task: "t".to_string(),
            exit_code: 0,
            outputs,
            command: "echo 1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_work_dir_is_sharded() {
        let store = CacheStore::new("/work");
        let fp = fingerprint();
        let dir = store.work_dir(&fp);
        let (shard, rest) = fp.dir_key();
        assert_eq!(dir, PathBuf::from("/work").join(shard).join(rest));
    }

    #[test]
    fn test_lookup_misses_without_manifest() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        assert!(store.lookup(&fingerprint()).is_none());
    }

    #[test]
    fn test_record_then_lookup_round_trip() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let fp = fingerprint();

        let work = store.work_dir(&fp);
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("out.txt"), "x").unwrap();

        let recorded = entry(&fp, vec![("out".to_string(), vec![PathBuf::from("out.txt")])]);
        store.record(&fp, &recorded).unwrap();

        let found = store.lookup(&fp).unwrap();
        assert_eq!(found.task, "t");
        assert_eq!(found.outputs[0].1, vec![PathBuf::from("out.txt")]);
    }

    #[test]
    fn test_missing_output_invalidates_entry() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let fp = fingerprint();

        let work = store.work_dir(&fp);
        fs::create_dir_all(&work).unwrap();
        let recorded = entry(&fp, vec![("out".to_string(), vec![PathBuf::from("gone.txt")])]);
        store.record(&fp, &recorded).unwrap();

        assert!(store.lookup(&fp).is_none());
    }

    #[test]
    fn test_corrupt_manifest_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let fp = fingerprint();

        let work = store.work_dir(&fp);
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join(MANIFEST_FILE), "{ not json").unwrap();

        assert!(store.lookup(&fp).is_none());
    }
}
