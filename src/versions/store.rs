//! VersionStore: append-only snapshot history

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::errors::{BankError, BankResult};
use crate::hashing::{ContentHash, ContentHasher};
use crate::observability::{log_event_with_fields, Event};
use crate::store::{atomic_write, is_temp_file, SnapshotSink};

use super::record::{name_key_of, ordering_key, snapshot_id, SnapshotMetadata, VersionSnapshot};

const RECORD_EXTENSION: &str = "json";

/// Result of a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub file_name: String,
    /// The restored content
    pub content: String,
    /// Snapshot the content came from
    pub source_snapshot_id: String,
    pub new_hash: ContentHash,
    /// Snapshot of the content the rollback replaced
    pub snapshot_id: Option<String>,
}

/// Snapshot history rooted at one directory
#[derive(Debug)]
pub struct VersionStore {
    history_dir: PathBuf,
    max_per_file: Option<usize>,
    // Last allocated timestamp; ids within one store strictly increase
    allocation: Mutex<Option<DateTime<Utc>>>,
}

impl VersionStore {
    /// Store rooted at `history_dir`, with optional per-file retention
    pub fn new(history_dir: PathBuf, max_per_file: Option<usize>) -> Self {
        Self {
            history_dir,
            max_per_file,
            allocation: Mutex::new(None),
        }
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    fn allocation_guard(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        match self.allocation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn file_dir(&self, file_name: &str) -> PathBuf {
        self.history_dir.join(ContentHasher::name_key(file_name))
    }

    fn record_path(&self, key: &str, snapshot_id: &str) -> PathBuf {
        self.history_dir
            .join(key)
            .join(format!("{}.{}", snapshot_id, RECORD_EXTENSION))
    }

    /// Record `content` as a snapshot of `file_name`; returns the snapshot id
    pub fn snapshot(
        &self,
        file_name: &str,
        content: &str,
        metadata: Option<SnapshotMetadata>,
    ) -> BankResult<String> {
        let id = {
            let mut last = self.allocation_guard();
            let mut now = Utc::now();
            if let Some(previous) = *last {
                if now <= previous {
                    now = previous + Duration::microseconds(1);
                }
            }
            *last = Some(now);
            let hash = ContentHasher::hash_str(content);
            let key = ContentHasher::name_key(file_name);

            let base = snapshot_id(now, file_name, &hash);
            let mut id = base.clone();
            let mut counter = 1;
            while self.record_path(&key, &id).exists() {
                counter += 1;
                id = format!("{}-{}", base, counter);
            }

            let record = VersionSnapshot::new(id.clone(), file_name, content, metadata, now);
            atomic_write(&self.record_path(&key, &id), record.to_json()?.as_bytes())?;
            id
        };

        log_event_with_fields(
            Event::SnapshotCreated,
            &[("file_name", file_name), ("snapshot_id", &id)],
        );

        // The snapshot is durable; retention is best effort
        if let Some(keep) = self.max_per_file {
            if let Err(err) = self.prune(file_name, keep) {
                log_event_with_fields(
                    Event::PruneFailed,
                    &[("file_name", file_name), ("error", &err.to_string())],
                );
            }
        }
        Ok(id)
    }

    /// All snapshots of `file_name`, newest first. Records that fail to read
    /// or verify are logged and left out; `get` still reports them.
    pub fn history(&self, file_name: &str) -> BankResult<Vec<VersionSnapshot>> {
        let dir = self.file_dir(file_name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BankError::io_at(&dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| BankError::io_at(&dir, e))?.path();
            if is_temp_file(&path)
                || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let record = match self.read_record(&path, &id) {
                Ok(record) => record,
                Err(err) => {
                    log_event_with_fields(
                        Event::SnapshotSkipped,
                        &[
                            ("file_name", file_name),
                            ("snapshot_id", &id),
                            ("code", err.code()),
                            ("reason", &err.to_string()),
                        ],
                    );
                    continue;
                }
            };
            // Name keys are truncated digests; keep only exact matches
            if record.file_name == file_name {
                records.push(record);
            }
        }

        records.sort_by(|a, b| ordering_key(&b.snapshot_id).cmp(&ordering_key(&a.snapshot_id)));
        Ok(records)
    }

    /// Most recent snapshot of `file_name`
    pub fn latest(&self, file_name: &str) -> BankResult<Option<VersionSnapshot>> {
        Ok(self.history(file_name)?.into_iter().next())
    }

    /// Look up one snapshot by id
    pub fn get(&self, snapshot_id: &str) -> BankResult<VersionSnapshot> {
        let key = name_key_of(snapshot_id)
            .ok_or_else(|| BankError::NotFound(format!("snapshot {}", snapshot_id)))?;
        let path = self.record_path(key, snapshot_id);
        if !path.is_file() {
            return Err(BankError::NotFound(format!("snapshot {}", snapshot_id)));
        }
        self.read_record(&path, snapshot_id)
    }

    fn read_record(&self, path: &Path, snapshot_id: &str) -> BankResult<VersionSnapshot> {
        let json = fs::read_to_string(path).map_err(|e| BankError::io_at(path, e))?;
        VersionSnapshot::from_json(snapshot_id, &json)
    }

    /// Keep the newest `keep` snapshots of `file_name`; returns how many were removed
    pub fn prune(&self, file_name: &str, keep: usize) -> BankResult<usize> {
        let history = self.history(file_name)?;
        let key = ContentHasher::name_key(file_name);
        let mut removed = 0;

        for record in history.iter().skip(keep) {
            let path = self.record_path(&key, &record.snapshot_id);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(BankError::io_at(&path, e)),
            }
        }

        if removed > 0 {
            log_event_with_fields(
                Event::SnapshotsPruned,
                &[("file_name", file_name), ("removed", &removed.to_string())],
            );
        }
        Ok(removed)
    }
}

impl SnapshotSink for VersionStore {
    fn snapshot(
        &self,
        file_name: &str,
        content: &str,
        metadata: Option<SnapshotMetadata>,
    ) -> BankResult<String> {
        VersionStore::snapshot(self, file_name, content, metadata)
    }
}
