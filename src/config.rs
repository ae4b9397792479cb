//! Engine configuration
//!
//! Configuration is a JSON file whose fields all have defaults:
//!
//! ```json
//! {
//!   "root": "./memory-bank",
//!   "lock_timeout_ms": 5000,
//!   "document_extensions": ["md"],
//!   "max_snapshots_per_file": null
//! }
//! ```
//!
//! The managed root is resolved once, at startup, through a
//! `PathResolutionPolicy`; nothing downstream re-derives it.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{BankError, BankResult};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    /// Managed root directory
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Engine-private directory, relative to the root
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Metadata index file, relative to `state_dir`
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// Snapshot history directory, relative to `state_dir`
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Advisory lock directory, relative to `state_dir`
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    /// Per-document lock acquisition timeout
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Also take an on-disk lock file per document
    #[serde(default = "default_cross_process_locks")]
    pub cross_process_locks: bool,

    /// File extensions treated as documents (without the dot)
    #[serde(default = "default_document_extensions")]
    pub document_extensions: Vec<String>,

    /// Keep at most this many snapshots per document; unbounded when absent
    #[serde(default)]
    pub max_snapshots_per_file: Option<usize>,

    /// Default transclusion depth limit; unbounded when absent
    #[serde(default)]
    pub default_max_depth: Option<usize>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".memory-bank")
}

fn default_index_file() -> PathBuf {
    PathBuf::from("index.json")
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("history")
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("locks")
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_cross_process_locks() -> bool {
    true
}

fn default_document_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            state_dir: default_state_dir(),
            index_file: default_index_file(),
            history_dir: default_history_dir(),
            lock_dir: default_lock_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
            cross_process_locks: default_cross_process_locks(),
            document_extensions: default_document_extensions(),
            max_snapshots_per_file: None,
            default_max_depth: None,
        }
    }
}

impl BankConfig {
    /// Default configuration rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> BankResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BankError::InvalidConfig(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: BankConfig = serde_json::from_str(&content)
            .map_err(|e| BankError::InvalidConfig(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate field values
    pub fn validate(&self) -> BankResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(BankError::InvalidConfig(
                "lock_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.document_extensions.is_empty() {
            return Err(BankError::InvalidConfig(
                "document_extensions must not be empty".to_string(),
            ));
        }

        for ext in &self.document_extensions {
            if ext.is_empty() || ext.starts_with('.') || ext.contains('/') {
                return Err(BankError::InvalidConfig(format!(
                    "Invalid document extension: '{}'. Use the bare extension, e.g. 'md'.",
                    ext
                )));
            }
        }

        if self.max_snapshots_per_file == Some(0) {
            return Err(BankError::InvalidConfig(
                "max_snapshots_per_file must be > 0 when set".to_string(),
            ));
        }

        check_relative("state_dir", &self.state_dir)?;
        check_relative("index_file", &self.index_file)?;
        check_relative("history_dir", &self.history_dir)?;
        check_relative("lock_dir", &self.lock_dir)?;

        Ok(())
    }

    /// Lock timeout as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Whether `name` carries a tracked document extension
    pub fn is_document(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.document_extensions.iter().any(|x| x == e))
            .unwrap_or(false)
    }

    /// Absolute state directory under `root`
    pub fn state_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir)
    }

    /// Absolute index file path under `root`
    pub fn index_path(&self, root: &Path) -> PathBuf {
        self.state_path(root).join(&self.index_file)
    }

    /// Absolute history directory under `root`
    pub fn history_path(&self, root: &Path) -> PathBuf {
        self.state_path(root).join(&self.history_dir)
    }

    /// Absolute lock directory under `root`
    pub fn lock_path(&self, root: &Path) -> PathBuf {
        self.state_path(root).join(&self.lock_dir)
    }
}

fn check_relative(field: &str, path: &Path) -> BankResult<()> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || path.as_os_str().is_empty() {
        return Err(BankError::InvalidConfig(format!(
            "{} must be a non-empty relative path without '..': {}",
            field,
            path.display()
        )));
    }
    Ok(())
}

/// Ordered list of candidate roots, resolved once to a canonical root.
///
/// Older deployments kept their documents in different places; instead of
/// probing every location on each call, the policy picks one root at
/// startup: the first candidate that already exists, otherwise the first
/// candidate (created on demand).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolutionPolicy {
    candidates: Vec<PathBuf>,
}

impl PathResolutionPolicy {
    /// Policy with a single candidate
    pub fn single(root: impl Into<PathBuf>) -> Self {
        Self {
            candidates: vec![root.into()],
        }
    }

    /// Policy over several candidates, in priority order
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Candidate roots in priority order
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Resolve to one canonical, existing root directory
    pub fn resolve(&self) -> BankResult<PathBuf> {
        let first = self
            .candidates
            .first()
            .ok_or_else(|| BankError::InvalidConfig("no root candidates configured".into()))?;

        let chosen = self
            .candidates
            .iter()
            .find(|c| c.is_dir())
            .unwrap_or(first);

        if !chosen.exists() {
            fs::create_dir_all(chosen).map_err(|e| BankError::io_at(chosen, e))?;
        }

        chosen.canonicalize().map_err(|e| BankError::io_at(chosen, e))
    }
}
