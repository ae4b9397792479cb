//! MetadataIndex: the persisted, recoverable document index
//!
//! # API
//!
//! - `load(source)` - read the index file, bootstrapping or recovering by
//!   rescan when needed
//! - `upsert(name, update)` - record facts after a write
//! - `save()` - atomic write-temp-then-rename
//! - `record_access(name)` - read bookkeeping
//! - `rescan(source)` - rebuild every entry from the documents on disk

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BankError, BankResult};
use crate::hashing::ContentHash;
use crate::markdown::LinkExtractor;
use crate::observability::{log_event_with_fields, Event, ObservationScope, Severity};
use crate::store::{atomic_write, read_optional, FileStore};

use super::metadata::{DocumentMetadata, MetadataUpdate};

/// Current index file format
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Where the index rescans documents from
pub trait DocumentSource {
    /// Names of every tracked document
    fn list_documents(&self) -> BankResult<Vec<String>>;

    /// Content and hash of one document
    fn read_document(&self, name: &str) -> BankResult<(String, ContentHash)>;

    /// Absolute on-disk path of one document
    fn document_path(&self, name: &str) -> BankResult<PathBuf>;
}

impl DocumentSource for FileStore {
    fn list_documents(&self) -> BankResult<Vec<String>> {
        FileStore::list_documents(self)
    }

    fn read_document(&self, name: &str) -> BankResult<(String, ContentHash)> {
        self.read(name)
    }

    fn document_path(&self, name: &str) -> BankResult<PathBuf> {
        self.guard().validate(name)
    }
}

/// How `load` obtained the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// Parsed from the index file
    Loaded { documents: usize },
    /// No index file yet; built by scanning
    Bootstrapped { documents: usize },
    /// The index file was corrupt; rebuilt by scanning
    Recovered { documents: usize, reason: String },
}

impl IndexState {
    pub fn documents(&self) -> usize {
        match self {
            IndexState::Loaded { documents }
            | IndexState::Bootstrapped { documents }
            | IndexState::Recovered { documents, .. } => *documents,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    updated_at: String,
    documents: BTreeMap<String, DocumentMetadata>,
}

/// Persistent record of every tracked document
#[derive(Debug)]
pub struct MetadataIndex {
    path: PathBuf,
    documents: BTreeMap<String, DocumentMetadata>,
    extractor: LinkExtractor,
    dirty: bool,
}

impl MetadataIndex {
    /// Empty index persisted at `path`
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            documents: BTreeMap::new(),
            extractor: LinkExtractor::new(),
            dirty: false,
        }
    }

    /// The index file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether in-memory state has changes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load the index file.
    ///
    /// - missing file: bootstrap by scanning `source`, then save
    /// - unparsable file or unknown format: exactly one rescan, then save
    /// - rescan failure during recovery: fatal `CorruptIndex`
    pub fn load<S: DocumentSource>(&mut self, source: &S) -> BankResult<IndexState> {
        let bytes = match read_optional(&self.path)? {
            Some(bytes) => bytes,
            None => {
                let documents = self.rescan(source)?;
                self.save()?;
                log_event_with_fields(
                    Event::IndexBootstrap,
                    &[("documents", &documents.to_string())],
                );
                return Ok(IndexState::Bootstrapped { documents });
            }
        };

        match Self::parse(&bytes) {
            Ok(documents) => {
                self.documents = documents;
                self.dirty = false;
                let count = self.documents.len();
                log_event_with_fields(Event::IndexLoaded, &[("documents", &count.to_string())]);
                Ok(IndexState::Loaded { documents: count })
            }
            Err(reason) => self.recover(source, reason),
        }
    }

    fn parse(bytes: &[u8]) -> Result<BTreeMap<String, DocumentMetadata>, String> {
        let file: IndexFile =
            serde_json::from_slice(bytes).map_err(|e| format!("unparsable index: {}", e))?;
        if file.format_version != INDEX_FORMAT_VERSION {
            return Err(format!(
                "unsupported index format_version {}",
                file.format_version
            ));
        }
        Ok(file.documents)
    }

    fn recover<S: DocumentSource>(
        &mut self,
        source: &S,
        reason: String,
    ) -> BankResult<IndexState> {
        log_event_with_fields(
            Event::IndexCorruption,
            &[("path", &self.path.display().to_string()), ("reason", &reason)],
        );
        let scope = ObservationScope::new("INDEX_RECOVERY");

        let rebuilt = self.rescan(source).and_then(|documents| {
            self.save()?;
            Ok(documents)
        });

        match rebuilt {
            Ok(documents) => {
                scope.complete_with_fields(&[("documents", &documents.to_string())]);
                log_event_with_fields(
                    Event::IndexRecoveryComplete,
                    &[("documents", &documents.to_string()), ("reason", &reason)],
                );
                Ok(IndexState::Recovered { documents, reason })
            }
            Err(err) => {
                let detail = format!("{}; recovery failed: {}", reason, err);
                scope.fail(Severity::Fatal, &detail);
                log_event_with_fields(Event::IndexRecoveryFailed, &[("reason", &detail)]);
                Err(BankError::CorruptIndex { reason: detail })
            }
        }
    }

    /// Replace every entry with facts recomputed from `source`; access
    /// statistics of documents that are still present carry over.
    /// Documents that cannot be read are left out and logged.
    pub fn rescan<S: DocumentSource>(&mut self, source: &S) -> BankResult<usize> {
        let now = Utc::now();
        let mut rebuilt = BTreeMap::new();

        for name in source.list_documents()? {
            let (content, _hash) = match source.read_document(&name) {
                Ok(read) => read,
                // Deleted between listing and reading
                Err(BankError::NotFound(_)) => continue,
                Err(err @ BankError::IoFailure { .. }) => {
                    log_event_with_fields(
                        Event::DocumentSkipped,
                        &[("name", &name), ("error", &err.to_string())],
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            let path = source.document_path(&name)?;
            let update = MetadataUpdate::from_content(path, &content, &self.extractor);

            let mut meta = DocumentMetadata::from_update(update, now);
            if let Some(previous) = self.documents.get(&name) {
                meta.read_count = previous.read_count;
                meta.last_access = previous.last_access;
            }
            rebuilt.insert(name, meta);
        }

        let count = rebuilt.len();
        self.documents = rebuilt;
        self.dirty = true;
        Ok(count)
    }

    /// Persist atomically
    pub fn save(&mut self) -> BankResult<()> {
        let file = IndexFile {
            format_version: INDEX_FORMAT_VERSION,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            documents: self.documents.clone(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| {
            BankError::io(
                "Failed to serialize metadata index",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        atomic_write(&self.path, &json)?;
        self.dirty = false;
        log_event_with_fields(
            Event::IndexSaved,
            &[("documents", &self.documents.len().to_string())],
        );
        Ok(())
    }

    /// Insert or update `name`
    pub fn upsert(&mut self, name: &str, update: MetadataUpdate) {
        let now = Utc::now();
        match self.documents.get_mut(name) {
            Some(existing) => existing.apply(update, now),
            None => {
                self.documents
                    .insert(name.to_string(), DocumentMetadata::from_update(update, now));
            }
        }
        self.dirty = true;
    }

    /// Upsert computed from content
    pub fn upsert_content(&mut self, name: &str, path: PathBuf, content: &str) {
        let update = MetadataUpdate::from_content(path, content, &self.extractor);
        self.upsert(name, update);
    }

    pub fn get(&self, name: &str) -> Option<&DocumentMetadata> {
        self.documents.get(name)
    }

    pub fn get_all(&self) -> &BTreeMap<String, DocumentMetadata> {
        &self.documents
    }

    /// Tracked names in sorted order
    pub fn list_names(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    /// Bump the read counter and access time of `name`
    pub fn record_access(&mut self, name: &str) -> BankResult<()> {
        self.record_access_at(name, Utc::now())
    }

    fn record_access_at(&mut self, name: &str, at: DateTime<Utc>) -> BankResult<()> {
        let meta = self
            .documents
            .get_mut(name)
            .ok_or_else(|| BankError::NotFound(name.to_string()))?;
        meta.read_count += 1;
        meta.last_access = Some(at);
        self.dirty = true;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<DocumentMetadata> {
        let removed = self.documents.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
