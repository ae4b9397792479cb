//! Error taxonomy for the Memory Bank engine
//!
//! Every failure that crosses the engine boundary is one of the variants
//! below. Each carries a stable `MB_*` code and a severity so collaborators
//! can map it onto their own transport without string matching.
//!
//! Error codes:
//! - MB_PATH_VIOLATION (ERROR)
//! - MB_NOT_FOUND (ERROR)
//! - MB_CONFLICT (ERROR)
//! - MB_LOCK_TIMEOUT (ERROR)
//! - MB_CORRUPT_INDEX (FATAL, only surfaced when recovery also failed)
//! - MB_CORRUPT_SNAPSHOT (ERROR)
//! - MB_CIRCULAR_TRANSCLUSION (ERROR)
//! - MB_DEPTH_EXCEEDED (ERROR)
//! - MB_MISSING_SECTION (ERROR)
//! - MB_CANCELLED (ERROR)
//! - MB_INVALID_CONFIG (ERROR)
//! - MB_IO_FAILURE (ERROR)

use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type for engine operations
pub type BankResult<T> = Result<T, BankError>;

/// Severity levels for engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, engine continues
    Error,
    /// Engine state cannot be trusted; caller must stop
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Engine errors
#[derive(Debug, Error)]
pub enum BankError {
    #[error("Path violation for '{path}': {reason}")]
    PathViolation { path: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write conflict on '{name}': expected {expected}, found {}", .actual.as_deref().unwrap_or("<absent>"))]
    Conflict {
        name: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Timed out after {waited_ms}ms waiting for lock on '{name}'")]
    LockTimeout { name: String, waited_ms: u64 },

    #[error("Corrupt metadata index: {reason}")]
    CorruptIndex { reason: String },

    #[error("Corrupt snapshot '{snapshot_id}': {reason}")]
    CorruptSnapshot { snapshot_id: String, reason: String },

    #[error("Circular transclusion: {}", format_chain(.chain))]
    CircularTransclusion { chain: Vec<String> },

    #[error("Transclusion depth {max_depth} exceeded: {}", format_chain(.chain))]
    DepthExceeded { chain: Vec<String>, max_depth: usize },

    #[error("Section '{section}' not found in '{document}'")]
    MissingSection { document: String, section: String },

    #[error("Resolution cancelled: {}", format_chain(.chain))]
    Cancelled { chain: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O failure: {context}")]
    IoFailure {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Renders a document chain as `a.md → b.md → a.md`
pub fn format_chain(chain: &[String]) -> String {
    chain.join(" → ")
}

impl BankError {
    /// I/O failure with a free-form context message
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BankError::IoFailure {
            context: context.into(),
            source,
        }
    }

    /// I/O failure at a specific path
    pub fn io_at(path: &Path, source: io::Error) -> Self {
        BankError::IoFailure {
            context: format!("I/O error at path: {}", path.display()),
            source,
        }
    }

    /// Path violation
    pub fn path_violation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BankError::PathViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// A mutex or rwlock was poisoned by a panicking holder
    pub fn poisoned(what: &str) -> Self {
        BankError::IoFailure {
            context: format!("{} lock poisoned", what),
            source: io::Error::new(io::ErrorKind::Other, "lock poisoned"),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            BankError::PathViolation { .. } => "MB_PATH_VIOLATION",
            BankError::NotFound(_) => "MB_NOT_FOUND",
            BankError::Conflict { .. } => "MB_CONFLICT",
            BankError::LockTimeout { .. } => "MB_LOCK_TIMEOUT",
            BankError::CorruptIndex { .. } => "MB_CORRUPT_INDEX",
            BankError::CorruptSnapshot { .. } => "MB_CORRUPT_SNAPSHOT",
            BankError::CircularTransclusion { .. } => "MB_CIRCULAR_TRANSCLUSION",
            BankError::DepthExceeded { .. } => "MB_DEPTH_EXCEEDED",
            BankError::MissingSection { .. } => "MB_MISSING_SECTION",
            BankError::Cancelled { .. } => "MB_CANCELLED",
            BankError::InvalidConfig(_) => "MB_INVALID_CONFIG",
            BankError::IoFailure { .. } => "MB_IO_FAILURE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            BankError::CorruptIndex { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Whether the caller must stop using the engine
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Whether a fresh read followed by a retry can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BankError::Conflict { .. } | BankError::LockTimeout { .. }
        )
    }
}
