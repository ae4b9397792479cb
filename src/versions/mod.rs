//! Version history
//!
//! Every core-mediated write snapshots the content it is about to replace.
//! Snapshots are immutable, checksummed JSON records sharded by a key
//! derived from the document name. `MemoryBank::rollback` restores one
//! through an ordinary versioned write, so rolling back is itself recorded.
//! A record that fails verification is skipped when listing history.
//!
//! Retention is unbounded unless `max_snapshots_per_file` is configured.

mod record;
mod store;

pub use record::{
    name_key_of, snapshot_id, SnapshotMetadata, SnapshotReason, VersionSnapshot, FORMAT_VERSION,
};
pub use store::{RollbackOutcome, VersionStore};
