//! Path containment checks
//!
//! Every component that touches a document path goes through `PathGuard`
//! first. A requested name must stay inside the managed root:
//!
//! - no absolute paths, NUL bytes or empty names
//! - no lexical `..` escape
//! - no symlink escape (the deepest existing ancestor is canonicalized)
//! - nothing inside the engine-private state directory
//!
//! Violations are reported as `PathViolation`, never corrected silently.

use std::path::{Path, PathBuf};

use crate::errors::{BankError, BankResult};

/// Validates document names against a canonical root
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    reserved: Vec<PathBuf>,
}

impl PathGuard {
    /// Guard for `root`, which must already be canonical
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            reserved: Vec::new(),
        }
    }

    /// Reserve a root-relative directory (e.g. the state dir) so documents
    /// cannot be read or written inside it
    pub fn with_reserved(mut self, relative: impl Into<PathBuf>) -> Self {
        self.reserved.push(relative.into());
        self
    }

    /// The canonical managed root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Boolean form of `validate`
    pub fn is_valid(&self, name: &str) -> bool {
        self.validate(name).is_ok()
    }

    /// Canonical project-relative name: forward slashes, no `.` segments,
    /// `..` folded lexically. Fails if the name escapes the root.
    pub fn normalize(name: &str) -> BankResult<String> {
        if name.is_empty() {
            return Err(BankError::path_violation(name, "empty path"));
        }
        if name.contains('\0') {
            return Err(BankError::path_violation(name, "NUL byte in path"));
        }

        let unified = name.replace('\\', "/");
        if unified.starts_with('/') || Path::new(name).is_absolute() {
            return Err(BankError::path_violation(name, "absolute paths are not allowed"));
        }

        let mut parts: Vec<&str> = Vec::new();
        for part in unified.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(BankError::path_violation(name, "escapes managed root"));
                    }
                }
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            return Err(BankError::path_violation(name, "path resolves to the root itself"));
        }

        Ok(parts.join("/"))
    }

    /// Validate `name` and return its absolute path under the root
    pub fn validate(&self, name: &str) -> BankResult<PathBuf> {
        let normalized = Self::normalize(name)?;
        let relative = Path::new(&normalized);

        for reserved in &self.reserved {
            if relative.starts_with(reserved) {
                return Err(BankError::path_violation(
                    name,
                    format!("inside reserved directory {}", reserved.display()),
                ));
            }
        }

        let full = self.root.join(relative);
        self.check_symlink_escape(name, &full)?;
        Ok(full)
    }

    /// Canonicalize the deepest existing ancestor and confirm it is still
    /// under the root.
    fn check_symlink_escape(&self, name: &str, full: &Path) -> BankResult<()> {
        let mut ancestor = full.to_path_buf();
        loop {
            if ancestor.exists() || ancestor.symlink_metadata().is_ok() {
                break;
            }
            if !ancestor.pop() {
                return Ok(());
            }
        }

        match ancestor.canonicalize() {
            Ok(canonical) => {
                if canonical.starts_with(&self.root) {
                    Ok(())
                } else {
                    Err(BankError::path_violation(
                        name,
                        format!("resolves outside managed root via {}", canonical.display()),
                    ))
                }
            }
            // Dangling symlink: its target cannot be verified
            Err(_) => Err(BankError::path_violation(name, "unresolvable symlink")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn guard() -> (TempDir, PathGuard) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let guard = PathGuard::new(root).with_reserved(".memory-bank");
        (temp, guard)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(PathGuard::normalize("a.md").unwrap(), "a.md");
        assert_eq!(PathGuard::normalize("./notes//a.md").unwrap(), "notes/a.md");
        assert_eq!(PathGuard::normalize("notes/../a.md").unwrap(), "a.md");
        assert_eq!(PathGuard::normalize("notes\\a.md").unwrap(), "notes/a.md");
    }

    #[test]
    fn test_rejects_traversal() {
        let (_t, guard) = guard();
        let err = guard.validate("../etc/passwd").unwrap_err();
        assert_eq!(err.code(), "MB_PATH_VIOLATION");
        assert!(!guard.is_valid("notes/../../x.md"));
    }

    #[test]
    fn test_rejects_absolute_empty_and_nul() {
        let (_t, guard) = guard();
        assert!(!guard.is_valid("/etc/passwd"));
        assert!(!guard.is_valid(""));
        assert!(!guard.is_valid("a\0.md"));
        assert!(!guard.is_valid("."));
    }

    #[test]
    fn test_rejects_reserved_state_dir() {
        let (_t, guard) = guard();
        assert!(!guard.is_valid(".memory-bank/index.json"));
        assert!(guard.is_valid("memory-bank/notes.md"));
    }

    #[test]
    fn test_accepts_nested_missing_path() {
        let (_t, guard) = guard();
        let path = guard.validate("deep/er/doc.md").unwrap();
        assert!(path.starts_with(guard.root()));
        assert!(path.ends_with("deep/er/doc.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let (temp, guard) = guard();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.md"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        let err = guard.validate("link/secret.md").unwrap_err();
        assert_eq!(err.code(), "MB_PATH_VIOLATION");
        assert!(!guard.is_valid("link/new.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_allows_symlink_inside_root() {
        let (temp, guard) = guard();
        fs::create_dir_all(temp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("alias")).unwrap();
        assert!(guard.is_valid("alias/doc.md"));
    }
}
