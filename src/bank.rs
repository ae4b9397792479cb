//! MemoryBank: the collaborator-facing engine
//!
//! Wires the subsystems together behind the operations a transport layer
//! consumes. Every operation returns a typed `BankResult`.
//!
//! Write path, under the per-document lock:
//! 1. FileStore compare-and-swap + atomic write (prior content snapshotted)
//! 2. MetadataIndex upsert + save
//! 3. DependencyGraph rebuilt from the index and published
//! 4. Resolver cache invalidated through the old and new reverse edges
//!
//! Lock order is document lock, then index, then graph. Reads take neither
//! the document lock nor the graph lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{BankConfig, PathResolutionPolicy};
use crate::errors::{BankError, BankResult};
use crate::graph::DependencyGraph;
use crate::hashing::ContentHash;
use crate::index::{DocumentMetadata, IndexState, MetadataIndex};
use crate::observability::{
    log_event_with_fields, BankMetrics, Event, MetricsSnapshot, ObservationScope,
};
use crate::resolver::{ResolveOptions, ResolvedDocument, TransclusionResolver};
use crate::store::{DocumentLock, FileStore, SnapshotSink, VersionPolicy, WriteOutcome};
use crate::versions::{RollbackOutcome, SnapshotReason, VersionSnapshot, VersionStore};

/// One open Memory Bank over a canonical root
#[derive(Debug)]
pub struct MemoryBank {
    config: BankConfig,
    root: PathBuf,
    files: Arc<FileStore>,
    versions: Arc<VersionStore>,
    index: Mutex<MetadataIndex>,
    graph: RwLock<DependencyGraph>,
    resolver: TransclusionResolver,
    metrics: BankMetrics,
}

impl MemoryBank {
    /// Open the bank rooted at `config.root`
    pub fn open(config: BankConfig) -> BankResult<Self> {
        let policy = PathResolutionPolicy::single(config.root.clone());
        Self::open_with_policy(config, &policy)
    }

    /// Open the bank at the root `policy` resolves to
    pub fn open_with_policy(config: BankConfig, policy: &PathResolutionPolicy) -> BankResult<Self> {
        config.validate()?;

        let root = policy.resolve()?;
        log_event_with_fields(
            Event::RootResolved,
            &[("root", &root.display().to_string())],
        );

        let versions = Arc::new(VersionStore::new(
            config.history_path(&root),
            config.max_snapshots_per_file,
        ));
        let sink: Arc<dyn SnapshotSink> = versions.clone();
        let files = Arc::new(FileStore::new(root.clone(), &config).with_snapshot_sink(sink));

        let metrics = BankMetrics::new();
        let mut index = MetadataIndex::new(config.index_path(&root));
        let state = index.load(&*files)?;
        if let IndexState::Recovered { .. } = state {
            metrics.increment_index_recoveries();
        }

        let graph = DependencyGraph::from_metadata(index.get_all());

        log_event_with_fields(
            Event::BankOpen,
            &[
                ("root", &root.display().to_string()),
                ("documents", &state.documents().to_string()),
                ("edges", &graph.edge_count().to_string()),
            ],
        );

        Ok(Self {
            config,
            root,
            files,
            versions,
            index: Mutex::new(index),
            graph: RwLock::new(graph),
            resolver: TransclusionResolver::new(),
            metrics,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    /// The document store, for callers that hold locks across several calls
    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    fn index(&self) -> BankResult<MutexGuard<'_, MetadataIndex>> {
        self.index
            .lock()
            .map_err(|_| BankError::poisoned("metadata index"))
    }

    fn graph_read(&self) -> BankResult<RwLockReadGuard<'_, DependencyGraph>> {
        self.graph
            .read()
            .map_err(|_| BankError::poisoned("dependency graph"))
    }

    fn graph_write(&self) -> BankResult<RwLockWriteGuard<'_, DependencyGraph>> {
        self.graph
            .write()
            .map_err(|_| BankError::poisoned("dependency graph"))
    }

    fn document_key(&self, name: &str) -> BankResult<String> {
        let key = self.files.normalize(name)?;
        if !self.config.is_document(&key) {
            return Err(BankError::path_violation(
                name,
                "extension is not a tracked document type",
            ));
        }
        Ok(key)
    }

    fn lock_document(&self, key: &str) -> BankResult<DocumentLock> {
        self.files.lock(key).map_err(|err| {
            if matches!(err, BankError::LockTimeout { .. }) {
                self.metrics.increment_lock_timeouts();
            }
            err
        })
    }

    /// Current content of `name` and the hash of those exact bytes
    pub fn read(&self, name: &str) -> BankResult<(String, ContentHash)> {
        let key = self.files.normalize(name)?;
        let (content, hash) = self.files.read(&key)?;

        {
            let mut index = self.index()?;
            if index.get(&key).is_none() {
                // Created outside the engine since the last scan
                let path = self.files.guard().validate(&key)?;
                index.upsert_content(&key, path, &content);
            }
            index.record_access(&key)?;
        }

        self.metrics.increment_reads();
        Ok((content, hash))
    }

    /// Write `content` to `name`.
    ///
    /// With `expected_hash`, the write only happens if the document's
    /// current bytes hash to that value; otherwise `Conflict`. Without it,
    /// the write is unconditional.
    pub fn write(
        &self,
        name: &str,
        content: &str,
        expected_hash: Option<&ContentHash>,
    ) -> BankResult<WriteOutcome> {
        let key = self.document_key(name)?;
        let lock = self.lock_document(&key)?;
        self.commit(&lock, content, expected_hash, &VersionPolicy::from_flag(true))
    }

    fn commit(
        &self,
        lock: &DocumentLock,
        content: &str,
        expected_hash: Option<&ContentHash>,
        policy: &VersionPolicy,
    ) -> BankResult<WriteOutcome> {
        let outcome = match self.files.write_locked(lock, content, expected_hash, policy) {
            Ok(outcome) => outcome,
            Err(err) => {
                if matches!(err, BankError::Conflict { .. }) {
                    self.metrics.increment_conflicts();
                }
                return Err(err);
            }
        };
        self.metrics.increment_writes();
        if outcome.snapshot_id.is_some() {
            self.metrics.increment_snapshots();
        }

        let key = outcome.name.as_str();
        let path = self.files.guard().validate(key)?;

        let (previous_graph, current_graph) = {
            let mut index = self.index()?;

            let indexed = index.get(key).and_then(|m| m.content_hash.clone());
            if let (Some(on_disk), Some(indexed)) = (&outcome.previous_hash, &indexed) {
                if on_disk != indexed {
                    log_event_with_fields(
                        Event::DriftDetected,
                        &[
                            ("name", key),
                            ("indexed", indexed.short()),
                            ("on_disk", on_disk.short()),
                        ],
                    );
                }
            }

            index.upsert_content(key, path, content);
            index.save()?;

            let rebuilt = DependencyGraph::from_metadata(index.get_all());
            let mut graph = self.graph_write()?;
            let previous = std::mem::replace(&mut *graph, rebuilt);
            (previous, graph.clone())
        };
        self.published(&current_graph);

        // The old graph still holds edges the new content removed
        self.resolver.invalidate(key, &previous_graph);
        self.resolver.invalidate(key, &current_graph);

        Ok(outcome)
    }

    fn published(&self, graph: &DependencyGraph) {
        self.metrics.increment_graph_rebuilds();
        log_event_with_fields(
            Event::GraphRebuilt,
            &[
                ("nodes", &graph.node_count().to_string()),
                ("edges", &graph.edge_count().to_string()),
                ("dangling", &graph.dangling().len().to_string()),
            ],
        );
    }

    /// Fully expanded content of `name`.
    ///
    /// `max_depth` falls back to the configured default.
    pub fn resolve(&self, name: &str, max_depth: Option<usize>) -> BankResult<ResolvedDocument> {
        let options = ResolveOptions {
            max_depth: max_depth.or(self.config.default_max_depth),
            ..ResolveOptions::default()
        };
        self.resolve_with(name, &options)
    }

    /// Resolve with explicit bounds (depth, cancellation, deadline)
    pub fn resolve_with(&self, name: &str, options: &ResolveOptions) -> BankResult<ResolvedDocument> {
        let key = self.files.normalize(name)?;
        self.metrics.increment_resolves();

        let resolved = self.resolver.resolve(&*self.files, &key, options)?;
        self.metrics
            .add_cache_stats(resolved.cache_hits, resolved.cache_misses);

        if !resolved.discovered_edges.is_empty() {
            let mut graph = self.graph_write()?;
            for (from, to) in &resolved.discovered_edges {
                graph.add_dynamic_edge(from, to);
            }
        }

        Ok(resolved)
    }

    /// Dependencies-first order over `names`, or over every document
    pub fn loading_order(&self, names: Option<&[String]>) -> BankResult<Vec<String>> {
        let keys = names
            .map(|names| {
                names
                    .iter()
                    .map(|n| self.files.normalize(n))
                    .collect::<BankResult<Vec<_>>>()
            })
            .transpose()?;
        self.graph_read()?.loading_order(keys.as_deref())
    }

    /// Snapshots of `name`, newest first
    pub fn history(&self, name: &str) -> BankResult<Vec<VersionSnapshot>> {
        let key = self.files.normalize(name)?;
        self.versions.history(&key)
    }

    /// Restore a snapshot through the normal write path
    pub fn rollback(&self, snapshot_id: &str) -> BankResult<RollbackOutcome> {
        let record = self.versions.get(snapshot_id)?;
        let lock = self.lock_document(&record.file_name)?;
        let outcome = self.commit(
            &lock,
            &record.content,
            None,
            &VersionPolicy::Snapshot {
                reason: SnapshotReason::Rollback,
                rolled_back_from: Some(record.snapshot_id.clone()),
            },
        )?;
        self.metrics.increment_rollbacks();

        log_event_with_fields(
            Event::RollbackComplete,
            &[("file_name", &record.file_name), ("snapshot_id", snapshot_id)],
        );

        Ok(RollbackOutcome {
            file_name: record.file_name,
            content: record.content,
            source_snapshot_id: record.snapshot_id,
            new_hash: outcome.new_hash,
            snapshot_id: outcome.snapshot_id,
        })
    }

    /// Drop all but the newest `keep` snapshots of `name`
    pub fn prune_history(&self, name: &str, keep: usize) -> BankResult<usize> {
        let key = self.files.normalize(name)?;
        self.versions.prune(&key, keep)
    }

    /// Indexed metadata of `name`
    pub fn metadata_of(&self, name: &str) -> BankResult<DocumentMetadata> {
        let key = self.files.normalize(name)?;
        self.index()?
            .get(&key)
            .cloned()
            .ok_or(BankError::NotFound(key))
    }

    /// Indexed document names, sorted
    pub fn list_names(&self) -> BankResult<Vec<String>> {
        Ok(self.index()?.list_names())
    }

    /// Rescan the root, rebuild the index and the graph, drop every cached
    /// resolution. Returns the number of documents indexed.
    pub fn rebuild_graph(&self) -> BankResult<usize> {
        let scope = ObservationScope::new("GRAPH_REBUILD");

        let (documents, graph) = {
            let mut index = self.index()?;
            let documents = index.rescan(&*self.files)?;
            index.save()?;

            let rebuilt = DependencyGraph::from_metadata(index.get_all());
            let mut graph = self.graph_write()?;
            *graph = rebuilt;
            (documents, graph.clone())
        };
        self.resolver.clear_cache();
        self.published(&graph);

        scope.complete_with_fields(&[("documents", &documents.to_string())]);
        Ok(documents)
    }

    /// Documents `name` references directly
    pub fn dependencies_of(&self, name: &str) -> BankResult<Vec<String>> {
        let key = self.files.normalize(name)?;
        Ok(self.graph_read()?.dependencies_of(&key))
    }

    /// Documents that reference `name` directly
    pub fn dependents_of(&self, name: &str) -> BankResult<Vec<String>> {
        let key = self.files.normalize(name)?;
        Ok(self.graph_read()?.dependents_of(&key))
    }

    /// Every cycle over link and inclusion edges
    pub fn find_cycles(&self) -> BankResult<Vec<Vec<String>>> {
        Ok(self.graph_read()?.find_cycles())
    }

    /// Copy of the currently published graph
    pub fn graph(&self) -> BankResult<DependencyGraph> {
        Ok(self.graph_read()?.clone())
    }

    /// Drop every cached resolution
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Persist pending index changes (access statistics)
    pub fn flush(&self) -> BankResult<()> {
        let mut index = self.index()?;
        if index.is_dirty() {
            index.save()?;
        }
        Ok(())
    }

    /// Flush the index and release this bank's lock files
    pub fn close(self) -> BankResult<()> {
        self.flush()?;
        let released = self.files.release_owned_locks()?;
        log_event_with_fields(
            Event::BankClose,
            &[
                ("root", &self.root.display().to_string()),
                ("locks_released", &released.to_string()),
            ],
        );
        Ok(())
    }
}
