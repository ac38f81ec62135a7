//! Delivery history: the bounded, persisted ledger of forwarded posts
//!
//! The history file is an ordered JSON array of `{id, date}` entries,
//! insertion-ordered (delivery order) and capped so storage never grows
//! unbounded. A missing file is an empty history, not an error. Saves
//! go through a temp file and an atomic rename so a failed write never
//! leaves a truncated ledger behind.

use crate::error::Result;
use crate::models::HistoryEntry;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Maximum number of entries kept in the history file
pub const HISTORY_CAP: usize = 200;

/// The delivery ledger
///
/// `contains` is backed by a hash set; the `entries` vector keeps
/// insertion order for persistence and eviction.
pub struct History {
    entries: Vec<HistoryEntry>,
    seen: HashSet<String>,
    path: PathBuf,
    cap: usize,
}

impl History {
    /// Load the history from disk; a missing file yields an empty history
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_cap(path, HISTORY_CAP)
    }

    /// Load with a custom cap
    pub fn load_with_cap(path: &Path, cap: usize) -> Result<Self> {
        let entries: Vec<HistoryEntry> = if path.exists() {
            let file = File::open(path)?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            Vec::new()
        };

        let seen = entries.iter().map(|e| e.id.clone()).collect();
        tracing::debug!(path = %path.display(), entries = entries.len(), "history loaded");

        Ok(Self {
            entries,
            seen,
            path: path.to_path_buf(),
            cap,
        })
    }

    /// Check whether a post id was already delivered
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record a delivered post; duplicate ids are ignored
    pub fn record(&mut self, id: &str, date: DateTime<Utc>) {
        if self.seen.insert(id.to_string()) {
            self.entries.push(HistoryEntry {
                id: id.to_string(),
                date,
            });
        }
    }

    /// Persist the history, truncated to the most recent `cap` entries
    ///
    /// Writes to a temp file then renames over the target, so the
    /// ledger on disk is always either the old or the new version.
    pub fn save(&self) -> Result<()> {
        let keep = if self.entries.len() > self.cap {
            &self.entries[self.entries.len() - self.cap..]
        } else {
            &self.entries[..]
        };

        let temp_path = self.path.with_extension("json.tmp");
        let file = File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, keep)?;
        fs::rename(&temp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), entries = keep.len(), "history saved");
        Ok(())
    }

    /// Entries in insertion (delivery) order
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_date(i: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + i, 0).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = History::load(&dir.path().join("history.json")).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_record_and_contains() {
        let dir = TempDir::new().unwrap();
        let mut history = History::load(&dir.path().join("history.json")).unwrap();

        assert!(!history.contains("a"));
        history.record("a", entry_date(0));
        assert!(history.contains("a"));
        assert!(!history.contains("b"));
    }

    #[test]
    fn test_duplicate_ids_ignored() {
        let dir = TempDir::new().unwrap();
        let mut history = History::load(&dir.path().join("history.json")).unwrap();

        history.record("a", entry_date(0));
        history.record("a", entry_date(1));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let mut history = History::load(&path).unwrap();
        history.record("a", entry_date(0));
        history.record("b", entry_date(1));
        history.save().unwrap();

        let reloaded = History::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("a"));
        assert!(reloaded.contains("b"));
        assert_eq!(reloaded.entries()[0].id, "a");
        assert_eq!(reloaded.entries()[1].id, "b");
    }

    #[test]
    fn test_save_truncates_to_cap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let mut history = History::load_with_cap(&path, 200).unwrap();
        for i in 0..250 {
            history.record(&format!("post-{i}"), entry_date(i));
        }
        history.save().unwrap();

        let reloaded = History::load(&path).unwrap();
        assert_eq!(reloaded.len(), 200);
        // oldest 50 dropped, order preserved
        assert_eq!(reloaded.entries()[0].id, "post-50");
        assert_eq!(reloaded.entries()[199].id, "post-249");
        assert!(!reloaded.contains("post-49"));
        assert!(reloaded.contains("post-50"));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let mut history = History::load(&path).unwrap();
        history.record("a", entry_date(0));
        history.save().unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
