//! Document storage
//!
//! FileStore owns the authoritative bytes of every tracked document:
//!
//! - reads return `(content, hash)` from a single file read
//! - writes take a per-document lock, check the caller's expected hash
//!   (compare-and-swap), snapshot the prior content, then replace the file
//!   atomically
//!
//! Snapshots are delegated through `SnapshotSink` so the history store can
//! be swapped or disabled without touching the write path.

mod atomic;
mod file_store;
mod lock;

pub use atomic::{atomic_write, is_temp_file, read_optional, sync_dir};
pub use file_store::{FileStore, VersionPolicy, WriteOutcome};
pub use lock::{DocumentLock, LockTable};

use crate::errors::BankResult;
use crate::versions::SnapshotMetadata;

/// Receives the prior content of a document before it is overwritten
pub trait SnapshotSink: Send + Sync + std::fmt::Debug {
    /// Persist `content` as a snapshot of `file_name`; returns the snapshot id
    fn snapshot(
        &self,
        file_name: &str,
        content: &str,
        metadata: Option<SnapshotMetadata>,
    ) -> BankResult<String>;
}
