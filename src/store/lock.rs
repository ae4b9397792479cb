//! Per-document advisory locks
//!
//! Two layers, taken in order:
//!
//! - in-process: a name set guarded by a mutex, waiters parked on a condvar
//! - cross-process (optional): an exclusive-create lock file per document
//!   under the lock directory, polled until the deadline
//!
//! Both are released when the `DocumentLock` guard drops. Reads never lock.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::errors::{BankError, BankResult};
use crate::hashing::ContentHasher;
use crate::observability::{log_event_with_fields, Event};

const LOCK_SUFFIX: &str = "lock";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Table of held document locks
#[derive(Debug)]
pub struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
    lock_dir: Option<PathBuf>,
    timeout: Duration,
    owner: String,
}

/// RAII guard for one document lock
#[derive(Debug)]
pub struct DocumentLock {
    table: Arc<LockTable>,
    name: String,
    lock_file: Option<PathBuf>,
}

impl DocumentLock {
    /// The normalized document name this guard protects
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn belongs_to(&self, table: &Arc<LockTable>) -> bool {
        Arc::ptr_eq(&self.table, table)
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Some(path) = self.lock_file.take() {
            let _ = fs::remove_file(path);
        }
        let mut held = self.table.held_set();
        held.remove(&self.name);
        drop(held);
        self.table.released.notify_all();
    }
}

impl LockTable {
    /// In-process locks only
    pub fn in_process(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            lock_dir: None,
            timeout,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// In-process locks backed by lock files under `lock_dir`
    pub fn with_lock_dir(timeout: Duration, lock_dir: PathBuf) -> Self {
        Self {
            lock_dir: Some(lock_dir),
            ..Self::in_process(timeout)
        }
    }

    /// Configured acquisition timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // A holder that panicked leaves the set consistent; keep using it
    fn held_set(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_file_path(&self, name: &str) -> Option<PathBuf> {
        self.lock_dir.as_ref().map(|dir| {
            dir.join(format!("{}.{}", ContentHasher::name_key(name), LOCK_SUFFIX))
        })
    }

    /// Acquire the lock for `name`, waiting at most the configured timeout
    pub fn acquire(self: &Arc<Self>, name: &str) -> BankResult<DocumentLock> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        {
            let mut held = self.held_set();
            while held.contains(name) {
                let now = Instant::now();
                if now >= deadline {
                    drop(held);
                    return Err(self.timeout_error(name, started));
                }
                held = match self.released.wait_timeout(held, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            held.insert(name.to_string());
        }

        // From here on the guard owns the in-process entry
        let mut guard = DocumentLock {
            table: Arc::clone(self),
            name: name.to_string(),
            lock_file: None,
        };

        if let Some(path) = self.lock_file_path(name) {
            self.acquire_file(&path, name, started, deadline)?;
            guard.lock_file = Some(path);
        }

        Ok(guard)
    }

    fn acquire_file(
        &self,
        path: &Path,
        name: &str,
        started: Instant,
        deadline: Instant,
    ) -> BankResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| BankError::io_at(dir, e))?;
        }

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(file) => return stamp_owner(path, file, &self.owner),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout_error(name, started));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(BankError::io_at(path, e)),
            }
        }
    }

    fn timeout_error(&self, name: &str, started: Instant) -> BankError {
        let waited_ms = started.elapsed().as_millis() as u64;
        log_event_with_fields(
            Event::LockTimeout,
            &[("name", name), ("waited_ms", &waited_ms.to_string())],
        );
        BankError::LockTimeout {
            name: name.to_string(),
            waited_ms,
        }
    }

    /// Whether `name` is currently locked by this process
    pub fn is_held(&self, name: &str) -> bool {
        self.held_set().contains(name)
    }

    /// Remove every lock file in the lock directory, including ones left by
    /// other processes, and wake all waiters. Returns the number removed.
    pub fn release_all(&self) -> BankResult<usize> {
        self.remove_lock_files(|_| true)
    }

    /// Remove only lock files created by this table
    pub fn release_owned(&self) -> BankResult<usize> {
        self.remove_lock_files(|owner| owner == self.owner)
    }

    fn remove_lock_files(&self, matches: impl Fn(&str) -> bool) -> BankResult<usize> {
        let mut removed = 0;

        if let Some(dir) = &self.lock_dir {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(BankError::io_at(dir, e)),
            };

            for entry in entries {
                let path = entry.map_err(|e| BankError::io_at(dir, e))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(LOCK_SUFFIX) {
                    continue;
                }
                let owner = fs::read_to_string(&path).unwrap_or_default();
                if !matches(owner.trim()) {
                    continue;
                }
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(BankError::io_at(&path, e)),
                }
            }
        }

        self.released.notify_all();
        log_event_with_fields(Event::LocksReleased, &[("removed", &removed.to_string())]);
        Ok(removed)
    }
}

/// Write `owner` into a freshly created lock file; a lock file that could not
/// be stamped is removed so it does not block later acquirers
fn stamp_owner<W: Write>(path: &Path, mut file: W, owner: &str) -> BankResult<()> {
    if let Err(e) = file.write_all(owner.as_bytes()) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(BankError::io_at(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let table = Arc::new(LockTable::in_process(Duration::from_millis(100)));
        {
            let guard = table.acquire("a.md").unwrap();
            assert_eq!(guard.name(), "a.md");
            assert!(table.is_held("a.md"));
        }
        assert!(!table.is_held("a.md"));
        let _again = table.acquire("a.md").unwrap();
    }

    #[test]
    fn test_second_acquire_times_out() {
        let table = Arc::new(LockTable::in_process(Duration::from_millis(50)));
        let _held = table.acquire("a.md").unwrap();
        let err = table.acquire("a.md").unwrap_err();
        assert_eq!(err.code(), "MB_LOCK_TIMEOUT");
    }

    #[test]
    fn test_different_names_do_not_contend() {
        let table = Arc::new(LockTable::in_process(Duration::from_millis(50)));
        let _a = table.acquire("a.md").unwrap();
        let _b = table.acquire("b.md").unwrap();
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let table = Arc::new(LockTable::in_process(Duration::from_secs(5)));
        let held = table.acquire("a.md").unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.acquire("a.md").map(|_| ()))
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_lock_file_created_and_removed() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("locks");
        let table = Arc::new(LockTable::with_lock_dir(Duration::from_millis(50), dir.clone()));

        let guard = table.acquire("a.md").unwrap();
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        drop(guard);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unstamped_lock_file_is_removed() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("locks");
        let table = Arc::new(LockTable::with_lock_dir(Duration::from_millis(50), dir.clone()));
        let path = table.lock_file_path("a.md").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "").unwrap();

        let err = stamp_owner(&path, FullDisk, &table.owner).unwrap_err();
        assert_eq!(err.code(), "MB_IO_FAILURE");
        assert!(!path.exists());
        assert!(table.acquire("a.md").is_ok());
    }

    #[test]
    fn test_foreign_lock_file_blocks_until_released() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("locks");
        let ours = Arc::new(LockTable::with_lock_dir(Duration::from_millis(50), dir.clone()));
        let theirs = Arc::new(LockTable::with_lock_dir(Duration::from_millis(50), dir.clone()));

        let _held = theirs.acquire("a.md").unwrap();
        assert_eq!(ours.acquire("a.md").unwrap_err().code(), "MB_LOCK_TIMEOUT");

        // Owned release leaves the other table's file alone
        assert_eq!(ours.release_owned().unwrap(), 0);
        assert_eq!(ours.release_all().unwrap(), 1);
        assert!(ours.acquire("a.md").is_ok());
    }
}
