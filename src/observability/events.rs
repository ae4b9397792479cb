//! Observable events for the Memory Bank engine
//!
//! Events are explicit and typed; each maps to a stable string name and a
//! default severity.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Bank opened and ready
    BankOpen,
    /// Bank closed
    BankClose,
    /// Managed root resolved from the path policy
    RootResolved,

    // Index
    /// Index loaded from disk
    IndexLoaded,
    /// No index file existed; built from a scan
    IndexBootstrap,
    /// Index file failed to parse
    IndexCorruption,
    /// Rebuild after corruption succeeded
    IndexRecoveryComplete,
    /// Rebuild after corruption failed (FATAL)
    IndexRecoveryFailed,
    /// Index persisted
    IndexSaved,
    /// A document could not be read during a scan and was left out
    DocumentSkipped,

    // Writes
    /// Document write committed
    WriteCommit,
    /// Compare-and-swap precondition failed
    WriteConflict,
    /// On-disk content differed from the indexed hash before a write
    DriftDetected,
    /// Per-document lock not acquired in time
    LockTimeout,
    /// Stale lock files removed
    LocksReleased,

    // History
    /// Snapshot of prior content recorded
    SnapshotCreated,
    /// Old snapshots removed by retention
    SnapshotsPruned,
    /// Rollback write committed
    RollbackComplete,
    /// A history record failed to read or verify and was passed over
    SnapshotSkipped,
    /// Retention could not prune after a snapshot
    PruneFailed,

    // Graph
    /// Dependency graph rebuilt and published
    GraphRebuilt,

    // Resolution
    /// Transclusion resolution finished
    ResolveComplete,
    /// Transclusion resolution failed
    ResolveFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::BankOpen => "BANK_OPEN",
            Event::BankClose => "BANK_CLOSE",
            Event::RootResolved => "ROOT_RESOLVED",
            Event::IndexLoaded => "INDEX_LOADED",
            Event::IndexBootstrap => "INDEX_BOOTSTRAP",
            Event::IndexCorruption => "INDEX_CORRUPTION",
            Event::IndexRecoveryComplete => "INDEX_RECOVERY_COMPLETE",
            Event::IndexRecoveryFailed => "INDEX_RECOVERY_FAILED",
            Event::IndexSaved => "INDEX_SAVED",
            Event::DocumentSkipped => "DOCUMENT_SKIPPED",
            Event::WriteCommit => "WRITE_COMMIT",
            Event::WriteConflict => "WRITE_CONFLICT",
            Event::DriftDetected => "DRIFT_DETECTED",
            Event::LockTimeout => "LOCK_TIMEOUT",
            Event::LocksReleased => "LOCKS_RELEASED",
            Event::SnapshotCreated => "SNAPSHOT_CREATED",
            Event::SnapshotsPruned => "SNAPSHOTS_PRUNED",
            Event::RollbackComplete => "ROLLBACK_COMPLETE",
            Event::SnapshotSkipped => "SNAPSHOT_SKIPPED",
            Event::PruneFailed => "PRUNE_FAILED",
            Event::GraphRebuilt => "GRAPH_REBUILT",
            Event::ResolveComplete => "RESOLVE_COMPLETE",
            Event::ResolveFailed => "RESOLVE_FAILED",
        }
    }

    /// Default severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::IndexRecoveryFailed => Severity::Fatal,
            Event::IndexCorruption
            | Event::WriteConflict
            | Event::DriftDetected
            | Event::LockTimeout
            | Event::DocumentSkipped
            | Event::SnapshotSkipped
            | Event::PruneFailed
            | Event::ResolveFailed => Severity::Warn,
            Event::IndexSaved | Event::ResolveComplete | Event::SnapshotCreated => {
                Severity::Trace
            }
            _ => Severity::Info,
        }
    }

    /// Returns true if this event means the engine must stop
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
