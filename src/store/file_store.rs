//! FileStore: locked, compare-and-swap, atomic document I/O

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::BankConfig;
use crate::errors::{BankError, BankResult};
use crate::hashing::{ContentHash, ContentHasher};
use crate::markdown::{self, Section};
use crate::observability::{log_event_with_fields, Event};
use crate::path_guard::PathGuard;
use crate::versions::{SnapshotMetadata, SnapshotReason};

use super::atomic::{atomic_write, is_temp_file, read_optional};
use super::lock::{DocumentLock, LockTable};
use super::SnapshotSink;

/// Whether and how a write records the prior content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Overwrite without recording history
    Skip,
    /// Snapshot the prior content first
    Snapshot {
        reason: SnapshotReason,
        rolled_back_from: Option<String>,
    },
}

impl VersionPolicy {
    /// Policy for an ordinary write
    pub fn from_flag(create_version: bool) -> Self {
        if create_version {
            VersionPolicy::Snapshot {
                reason: SnapshotReason::Write,
                rolled_back_from: None,
            }
        } else {
            VersionPolicy::Skip
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub name: String,
    pub new_hash: ContentHash,
    /// Hash of the bytes that were on disk before the write
    pub previous_hash: Option<ContentHash>,
    /// Snapshot of the prior content, when one was taken
    pub snapshot_id: Option<String>,
}

/// Authoritative document storage under one managed root
#[derive(Debug)]
pub struct FileStore {
    guard: PathGuard,
    state_dir: PathBuf,
    extensions: Vec<String>,
    locks: Arc<LockTable>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
}

impl FileStore {
    /// Store over the canonical `root`
    pub fn new(root: PathBuf, config: &BankConfig) -> Self {
        let locks = if config.cross_process_locks {
            LockTable::with_lock_dir(config.lock_timeout(), config.lock_path(&root))
        } else {
            LockTable::in_process(config.lock_timeout())
        };

        Self {
            guard: PathGuard::new(root.clone()).with_reserved(config.state_dir.clone()),
            state_dir: config.state_path(&root),
            extensions: config.document_extensions.clone(),
            locks: Arc::new(locks),
            snapshots: None,
        }
    }

    /// Route prior-content snapshots to `sink`
    pub fn with_snapshot_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = Some(sink);
        self
    }

    /// The canonical managed root
    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    /// The guard every path goes through
    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Canonical document key for `name`
    pub fn normalize(&self, name: &str) -> BankResult<String> {
        self.guard.validate(name)?;
        PathGuard::normalize(name)
    }

    /// Read `name`, returning its content and the hash of those exact bytes
    pub fn read(&self, name: &str) -> BankResult<(String, ContentHash)> {
        let path = self.guard.validate(name)?;
        if path.is_dir() {
            return Err(BankError::NotFound(name.to_string()));
        }
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BankError::NotFound(name.to_string()))
            }
            Err(e) => return Err(BankError::io_at(&path, e)),
        };

        let hash = ContentHasher::hash(&bytes);
        let content = String::from_utf8(bytes).map_err(|e| {
            BankError::io(
                format!("Document is not valid UTF-8: {}", path.display()),
                std::io::Error::new(ErrorKind::InvalidData, e),
            )
        })?;
        Ok((content, hash))
    }

    /// Current hash of `name`, or `None` if it does not exist
    pub fn current_hash(&self, name: &str) -> BankResult<Option<ContentHash>> {
        let path = self.guard.validate(name)?;
        Ok(read_optional(&path)?.map(|bytes| ContentHasher::hash(&bytes)))
    }

    /// Whether `name` exists as a regular file
    pub fn exists(&self, name: &str) -> BankResult<bool> {
        Ok(self.guard.validate(name)?.is_file())
    }

    /// Sections of `content`, in document order
    pub fn parse_sections(&self, content: &str) -> Vec<Section> {
        markdown::parse_sections(content)
    }

    /// Take the per-document lock for `name`
    pub fn lock(&self, name: &str) -> BankResult<DocumentLock> {
        let normalized = self.normalize(name)?;
        self.locks.acquire(&normalized)
    }

    /// Lock, then write. See `write_locked`.
    pub fn write(
        &self,
        name: &str,
        content: &str,
        expected_hash: Option<&ContentHash>,
        create_version: bool,
    ) -> BankResult<WriteOutcome> {
        let lock = self.lock(name)?;
        self.write_locked(&lock, content, expected_hash, &VersionPolicy::from_flag(create_version))
    }

    /// Write under an already-held lock.
    ///
    /// - `expected_hash` must match the bytes currently on disk; an expected
    ///   hash for a missing document is a conflict
    /// - on mismatch nothing is written
    /// - the prior content is snapshotted before the file is replaced
    pub fn write_locked(
        &self,
        lock: &DocumentLock,
        content: &str,
        expected_hash: Option<&ContentHash>,
        policy: &VersionPolicy,
    ) -> BankResult<WriteOutcome> {
        if !lock.belongs_to(&self.locks) {
            return Err(BankError::path_violation(
                lock.name(),
                "lock was taken from a different store",
            ));
        }
        let name = lock.name();
        let path = self.guard.validate(name)?;

        let prior = read_optional(&path)?;
        let previous_hash = prior.as_deref().map(ContentHasher::hash);

        if let Some(expected) = expected_hash {
            if previous_hash.as_ref() != Some(expected) {
                let actual = previous_hash.as_ref().map(|h| h.to_string());
                log_event_with_fields(
                    Event::WriteConflict,
                    &[
                        ("name", name),
                        ("expected", expected.as_str()),
                        ("actual", actual.as_deref().unwrap_or("<absent>")),
                    ],
                );
                return Err(BankError::Conflict {
                    name: name.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let mut snapshot_id = None;
        if let (VersionPolicy::Snapshot { reason, rolled_back_from }, Some(prior), Some(sink)) =
            (policy, prior.as_deref(), self.snapshots.as_ref())
        {
            let prior_text = String::from_utf8_lossy(prior);
            let metadata =
                SnapshotMetadata::for_content(*reason, &prior_text, rolled_back_from.clone());
            snapshot_id = Some(sink.snapshot(name, &prior_text, Some(metadata))?);
        }

        atomic_write(&path, content.as_bytes())?;
        let new_hash = ContentHasher::hash_str(content);

        log_event_with_fields(
            Event::WriteCommit,
            &[
                ("name", name),
                ("hash", new_hash.short()),
                ("snapshot_id", snapshot_id.as_deref().unwrap_or("")),
            ],
        );

        Ok(WriteOutcome {
            name: name.to_string(),
            new_hash,
            previous_hash,
            snapshot_id,
        })
    }

    /// Every tracked document under the root, sorted by name
    pub fn list_documents(&self) -> BankResult<Vec<String>> {
        let mut names = Vec::new();
        self.walk(self.root(), &mut names)?;
        names.sort();
        Ok(names)
    }

    fn walk(&self, dir: &Path, names: &mut Vec<String>) -> BankResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| BankError::io_at(dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| BankError::io_at(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| BankError::io_at(&path, e))?;

            if file_type.is_dir() {
                if path != self.state_dir {
                    self.walk(&path, names)?;
                }
                continue;
            }
            if is_temp_file(&path) || !self.has_document_extension(&path) {
                continue;
            }

            let relative = match path.strip_prefix(self.root()) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            // Symlinked files count only if they stay inside the root
            if file_type.is_symlink() && !(self.guard.is_valid(&name) && path.is_file()) {
                continue;
            }
            names.push(name);
        }

        Ok(())
    }

    fn has_document_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x == e))
            .unwrap_or(false)
    }

    /// Whether this process currently holds the lock for `name`
    pub fn is_locked(&self, name: &str) -> bool {
        PathGuard::normalize(name)
            .map(|n| self.locks.is_held(&n))
            .unwrap_or(false)
    }

    /// Remove every advisory lock file under the lock directory, including
    /// ones left behind by a crashed process
    pub fn release_all_locks(&self) -> BankResult<usize> {
        self.locks.release_all()
    }

    /// Remove only the lock files this store created
    pub fn release_owned_locks(&self) -> BankResult<usize> {
        self.locks.release_owned()
    }
}
