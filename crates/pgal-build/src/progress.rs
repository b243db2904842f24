//! Resumable build progress.
//!
//! The record holds the ordered source fingerprints of the run that wrote it
//! and the scan-order ids whose conversions are complete. It lives in
//! `<work_dir>/progress.json`, replaced atomically (temp file + rename) on
//! every write, and removed when a build succeeds.
//!
//! Only the build orchestrator mutates the record. A single background
//! task persists it: while one write is in progress, any number of further
//! updates collapse into the next write.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub version: u32,
    pub fingerprints: Vec<String>,
    pub completed: BTreeSet<u32>,
}

impl ProgressRecord {
    pub fn new(fingerprints: Vec<String>) -> Self {
        Self {
            version: RECORD_VERSION,
            fingerprints,
            completed: BTreeSet::new(),
        }
    }

    /// Valid for resumption only if the input set is unchanged.
    pub fn matches(&self, fingerprints: &[String]) -> bool {
        self.version == RECORD_VERSION && self.fingerprints == fingerprints
    }
}

/// On-disk location of a [`ProgressRecord`].
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    path: PathBuf,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(work_dir: &Path) -> Self {
        Self::new(work_dir.join("progress.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. An unreadable or unparseable file counts as absent.
    pub fn load(&self) -> Option<ProgressRecord> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "progress record unreadable: {e}");
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "progress record corrupt, ignoring: {e}");
                None
            }
        }
    }

    /// Atomic write: write to temp file, then rename.
    pub fn write(&self, record: &ProgressRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record).context("serializing progress record")?;
        self.write_bytes(&json)
    }

    fn write_bytes(&self, json: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating progress dir: {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("writing progress temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming progress record: {}", self.path.display()))?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

/// Owns the in-memory record and the task that persists it.
pub struct ProgressWriter {
    record: Arc<Mutex<ProgressRecord>>,
    revision: watch::Sender<u64>,
    task: JoinHandle<Result<u64>>,
}

fn lock(record: &Mutex<ProgressRecord>) -> MutexGuard<'_, ProgressRecord> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProgressWriter {
    /// Start persisting `record` to `ledger`. The initial state is written
    /// immediately.
    pub fn spawn(ledger: ProgressLedger, record: ProgressRecord) -> Self {
        let record = Arc::new(Mutex::new(record));
        let (revision, mut changes) = watch::channel(0u64);

        let shared = Arc::clone(&record);
        let task = tokio::spawn(async move {
            let mut writes = 0u64;
            loop {
                let json = serde_json::to_vec_pretty(&*lock(&shared))
                    .context("serializing progress record")?;
                let target = ledger.clone();
                tokio::task::spawn_blocking(move || target.write_bytes(&json))
                    .await
                    .context("progress writer panicked")??;
                writes += 1;

                // Err once the owner is gone and the last revision is written
                if changes.changed().await.is_err() {
                    break;
                }
                changes.borrow_and_update();
            }
            tracing::debug!(writes, path = %ledger.path().display(), "progress writer stopped");
            Ok(writes)
        });

        Self {
            record,
            revision,
            task,
        }
    }

    /// Apply `f` and schedule a write.
    pub fn update(&self, f: impl FnOnce(&mut ProgressRecord)) {
        f(&mut lock(&self.record));
        self.revision.send_modify(|rev| *rev += 1);
    }

    pub fn snapshot(&self) -> ProgressRecord {
        lock(&self.record).clone()
    }

    /// Flush the final state and stop. Returns the number of writes made.
    pub async fn finish(self) -> Result<u64> {
        let Self { revision, task, .. } = self;
        drop(revision);
        task.await.context("progress writer task")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fps(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i}.jpg|{i}")).collect()
    }

    #[test]
    fn test_missing_and_corrupt_records_are_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::in_dir(tmp.path());
        assert!(ledger.load().is_none());

        std::fs::write(ledger.path(), b"{ not json").unwrap();
        assert!(ledger.load().is_none());
    }

    #[test]
    fn test_write_load_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::in_dir(&tmp.path().join("nested"));
        let mut record = ProgressRecord::new(fps(3));
        record.completed.extend([0, 2]);

        ledger.write(&record).unwrap();
        assert_eq!(ledger.load().unwrap(), record);
        assert!(!ledger.path().with_extension("tmp").exists());

        ledger.remove().unwrap();
        assert!(ledger.load().is_none());
        ledger.remove().unwrap();
    }

    #[test]
    fn test_matches_requires_identical_fingerprints() {
        let record = ProgressRecord::new(fps(3));
        assert!(record.matches(&fps(3)));
        assert!(!record.matches(&fps(2)));
        let mut reordered = fps(3);
        reordered.swap(0, 1);
        assert!(!record.matches(&reordered));
    }

    #[tokio::test]
    async fn test_writer_persists_initial_state() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::in_dir(tmp.path());
        let writer = ProgressWriter::spawn(ledger.clone(), ProgressRecord::new(fps(2)));
        let writes = writer.finish().await.unwrap();
        assert_eq!(writes, 1);
        assert_eq!(ledger.load().unwrap().fingerprints, fps(2));
    }

    #[tokio::test]
    async fn test_writer_coalesces_and_keeps_last_state() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::in_dir(tmp.path());
        let writer = ProgressWriter::spawn(ledger.clone(), ProgressRecord::new(fps(500)));

        for id in 0..500u32 {
            writer.update(|r| {
                r.completed.insert(id);
            });
        }
        assert_eq!(writer.snapshot().completed.len(), 500);

        let writes = writer.finish().await.unwrap();
        assert!(writes >= 1 && writes <= 501, "writes = {writes}");
        let on_disk = ledger.load().unwrap();
        assert_eq!(on_disk.completed.len(), 500);
    }
}
