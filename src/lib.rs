//! memorybank - storage and consistency engine for a Memory Bank
//!
//! A Memory Bank is a directory of markdown documents that link to and
//! include one another. This crate keeps it consistent:
//!
//! - Content-hash compare-and-swap writes under per-document locks
//! - Append-only snapshot history with rollback
//! - A persisted, self-healing metadata index
//! - A link/inclusion dependency graph with deterministic loading order
//! - Recursive `{{include:...}}` resolution with cycle and depth bounds

pub mod bank;
pub mod config;
pub mod errors;
pub mod graph;
pub mod hashing;
pub mod index;
pub mod markdown;
pub mod observability;
pub mod path_guard;
pub mod resolver;
pub mod store;
pub mod versions;

pub use bank::MemoryBank;
pub use config::{BankConfig, PathResolutionPolicy};
pub use errors::{BankError, BankResult};
pub use hashing::{ContentHash, ContentHasher};
pub use resolver::{CancellationFlag, ResolveOptions, ResolvedDocument};
pub use store::WriteOutcome;
pub use versions::{RollbackOutcome, VersionSnapshot};
