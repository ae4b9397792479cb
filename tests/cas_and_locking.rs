//! CAS and Locking Tests
//!
//! Tests for write-safety invariants:
//! - A stale expected hash never overwrites a newer write
//! - Writers to one document are serialized by its lock
//! - Lock acquisition is bounded by the configured timeout
//! - Lock files left behind by another bank can be cleared

use std::sync::Arc;
use std::thread;

use memorybank::{BankConfig, BankError, ContentHasher, MemoryBank};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(temp: &TempDir, lock_timeout_ms: u64) -> BankConfig {
    let mut config = BankConfig::with_root(temp.path());
    config.lock_timeout_ms = lock_timeout_ms;
    config
}

// =============================================================================
// Compare-And-Swap
// =============================================================================

/// Two writers observe H0; the second to commit conflicts, then succeeds on retry.
#[test]
fn test_second_writer_conflicts_then_retries() {
    let temp = TempDir::new().unwrap();
    let bank = MemoryBank::open(config(&temp, 5000)).unwrap();

    let h0 = bank.write("shared.md", "base", None).unwrap().new_hash;

    let a = bank.write("shared.md", "from A", Some(&h0)).unwrap();
    let h1 = a.new_hash;

    match bank.write("shared.md", "from B", Some(&h0)).unwrap_err() {
        BankError::Conflict {
            name,
            expected,
            actual,
        } => {
            assert_eq!(name, "shared.md");
            assert_eq!(expected, h0.to_string());
            assert_eq!(actual, Some(h1.to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bank.read("shared.md").unwrap().0, "from A");

    bank.write("shared.md", "from B", Some(&h1)).unwrap();
    assert_eq!(bank.read("shared.md").unwrap().0, "from B");
}

/// An expected hash for a document that does not exist is a conflict.
#[test]
fn test_expected_hash_on_missing_document() {
    let temp = TempDir::new().unwrap();
    let bank = MemoryBank::open(config(&temp, 5000)).unwrap();

    let guess = ContentHasher::hash_str("anything");
    let err = bank.write("new.md", "x", Some(&guess)).unwrap_err();
    assert_eq!(err.code(), "MB_CONFLICT");
    assert!(err.is_retryable());
    assert!(!temp.path().join("new.md").exists());
}

/// Out-of-band edits are caught by CAS against the bytes on disk.
#[test]
fn test_out_of_band_edit_conflicts() {
    let temp = TempDir::new().unwrap();
    let bank = MemoryBank::open(config(&temp, 5000)).unwrap();

    let h0 = bank.write("a.md", "engine", None).unwrap().new_hash;
    std::fs::write(temp.path().join("a.md"), "editor").unwrap();

    assert_eq!(bank.write("a.md", "engine 2", Some(&h0)).unwrap_err().code(), "MB_CONFLICT");

    let (_, fresh) = bank.read("a.md").unwrap();
    bank.write("a.md", "engine 2", Some(&fresh)).unwrap();
}

/// Read-modify-write loops with retry never lose an update.
#[test]
fn test_concurrent_increments_lose_nothing() {
    let temp = TempDir::new().unwrap();
    let bank = Arc::new(MemoryBank::open(config(&temp, 5000)).unwrap());
    bank.write("counter.md", "0", None).unwrap();

    let threads = 4;
    let per_thread = 5;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let bank = Arc::clone(&bank);
            thread::spawn(move || {
                let mut conflicts = 0;
                for _ in 0..per_thread {
                    loop {
                        let (content, hash) = bank.read("counter.md").unwrap();
                        let next = content.trim().parse::<u64>().unwrap() + 1;
                        match bank.write("counter.md", &next.to_string(), Some(&hash)) {
                            Ok(_) => break,
                            Err(BankError::Conflict { .. }) => conflicts += 1,
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                }
                conflicts
            })
        })
        .collect();

    let conflicts: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let (content, _) = bank.read("counter.md").unwrap();
    assert_eq!(content, (threads * per_thread).to_string());
    assert_eq!(bank.metrics().conflicts, conflicts);
    assert_eq!(bank.history("counter.md").unwrap().len(), threads * per_thread);
}

// =============================================================================
// Lock Timeout
// =============================================================================

/// A held lock makes another writer time out with LockTimeout.
#[test]
fn test_lock_timeout_in_process() {
    let temp = TempDir::new().unwrap();
    let bank = MemoryBank::open(config(&temp, 100)).unwrap();

    let held = bank.files().lock("a.md").unwrap();
    match bank.write("a.md", "blocked", None).unwrap_err() {
        BankError::LockTimeout { name, waited_ms } => {
            assert_eq!(name, "a.md");
            assert!(waited_ms >= 100);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bank.metrics().lock_timeouts, 1);

    drop(held);
    bank.write("a.md", "free", None).unwrap();
}

/// Locks on different documents do not interfere.
#[test]
fn test_locks_are_per_document() {
    let temp = TempDir::new().unwrap();
    let bank = MemoryBank::open(config(&temp, 100)).unwrap();

    let _held = bank.files().lock("a.md").unwrap();
    bank.write("b.md", "independent", None).unwrap();
}

/// A waiting writer proceeds once the holder releases.
#[test]
fn test_waiter_proceeds_after_release() {
    let temp = TempDir::new().unwrap();
    let bank = Arc::new(MemoryBank::open(config(&temp, 5000)).unwrap());

    let held = bank.files().lock("a.md").unwrap();
    let writer = {
        let bank = Arc::clone(&bank);
        thread::spawn(move || bank.write("a.md", "after", None))
    };

    thread::sleep(std::time::Duration::from_millis(50));
    drop(held);

    writer.join().unwrap().unwrap();
    assert_eq!(bank.read("a.md").unwrap().0, "after");
}

// =============================================================================
// Cross-Bank Lock Files
// =============================================================================

/// Two banks over one root contend through lock files.
#[test]
fn test_lock_files_shared_between_banks() {
    let temp = TempDir::new().unwrap();
    let first = MemoryBank::open(config(&temp, 100)).unwrap();
    let second = MemoryBank::open(config(&temp, 100)).unwrap();

    let held = first.files().lock("a.md").unwrap();
    assert_eq!(
        second.write("a.md", "x", None).unwrap_err().code(),
        "MB_LOCK_TIMEOUT"
    );

    drop(held);
    second.write("a.md", "x", None).unwrap();
}

/// Lock files of a bank that never released them are cleared on request.
#[test]
fn test_stale_lock_files_released() {
    let temp = TempDir::new().unwrap();
    let crashed = MemoryBank::open(config(&temp, 100)).unwrap();
    std::mem::forget(crashed.files().lock("a.md").unwrap());

    let survivor = MemoryBank::open(config(&temp, 100)).unwrap();
    assert_eq!(
        survivor.write("a.md", "x", None).unwrap_err().code(),
        "MB_LOCK_TIMEOUT"
    );

    // Only files this bank owns are touched on close
    assert_eq!(survivor.files().release_owned_locks().unwrap(), 0);
    assert_eq!(survivor.files().release_all_locks().unwrap(), 1);
    survivor.write("a.md", "x", None).unwrap();
}
