//! Durable write primitives
//!
//! Every on-disk mutation in the engine goes through `atomic_write`:
//!
//! 1. write the full payload to a uniquely named temp file in the target's
//!    directory
//! 2. fsync the temp file
//! 3. rename over the target
//! 4. fsync the directory so the rename itself is durable
//!
//! A crash at any step leaves either the old file or the new file, never a
//! partial one. Stray temp files are ignored by every scanner because their
//! names start with a dot and end in `.tmp`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::errors::{BankError, BankResult};

const TEMP_SUFFIX: &str = ".tmp";

/// Whether `path` looks like a temp file left by `atomic_write`
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

fn temp_path_for(path: &Path) -> BankResult<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BankError::path_violation(path.display().to_string(), "no file name"))?;
    Ok(path.with_file_name(format!(
        ".{}.{}{}",
        file_name,
        Uuid::new_v4().simple(),
        TEMP_SUFFIX
    )))
}

/// Atomically replace `path` with `bytes`, creating parent directories
pub fn atomic_write(path: &Path, bytes: &[u8]) -> BankResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| BankError::path_violation(path.display().to_string(), "no parent directory"))?;
    if !parent.exists() {
        fs::create_dir_all(parent)
            .map_err(|e| BankError::io(format!("Failed to create directory: {}", parent.display()), e))?;
    }

    let temp = temp_path_for(path)?;
    if let Err(err) = write_and_sync(&temp, bytes) {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(BankError::io(
            format!("Failed to rename {} over {}", temp.display(), path.display()),
            e,
        ));
    }

    sync_dir(parent)
}

fn write_and_sync(temp: &Path, bytes: &[u8]) -> BankResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .map_err(|e| BankError::io(format!("Failed to create temp file: {}", temp.display()), e))?;

    file.write_all(bytes)
        .map_err(|e| BankError::io(format!("Failed to write temp file: {}", temp.display()), e))?;

    // fsync is mandatory before the rename
    file.sync_all()
        .map_err(|e| BankError::io(format!("Failed to fsync temp file: {}", temp.display()), e))
}

/// fsync a directory so renames and creations inside it are durable
pub fn sync_dir(dir: &Path) -> BankResult<()> {
    #[cfg(unix)]
    {
        let handle = File::open(dir).map_err(|e| {
            BankError::io(format!("Failed to open directory for fsync: {}", dir.display()), e)
        })?;
        handle
            .sync_all()
            .map_err(|e| BankError::io(format!("Failed to fsync directory: {}", dir.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Read a whole file, mapping `NotFound` to `None`
pub fn read_optional(path: &Path) -> BankResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BankError::io_at(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/doc.md");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.md");
        atomic_write(&path, b"v1").unwrap();
        atomic_write(&path, b"v2").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"v2");

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_file(&e.path()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("/x/.doc.md.0123abcd.tmp")));
        assert!(!is_temp_file(Path::new("/x/doc.md")));
        assert!(!is_temp_file(Path::new("/x/notes.tmp")));
    }

    #[test]
    fn test_read_optional() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.md");
        assert!(read_optional(&path).unwrap().is_none());
        fs::write(&path, "x").unwrap();
        assert_eq!(read_optional(&path).unwrap(), Some(b"x".to_vec()));
    }
}
