//! Metadata index
//!
//! The index is derived state: it caches facts about document bytes
//! (hash, size, token estimate, sections, links, inclusion directives) plus
//! read bookkeeping. Document files stay the source of truth.
//!
//! # Invariants
//!
//! - After any core-mediated write, a document's `content_hash` equals the
//!   hash of the bytes on disk
//! - The index file is only ever replaced atomically
//! - A corrupt index file gets exactly one rebuild by rescan; if that fails
//!   the error is fatal
//!
//! Concurrent processes sharing a root overwrite each other's index file on
//! save (last writer wins). The loss is bounded to access counters, since
//! every other field is recomputed from the documents on the next write or
//! rescan.

mod manager;
mod metadata;

pub use manager::{DocumentSource, IndexState, MetadataIndex, INDEX_FORMAT_VERSION};
pub use metadata::{DocumentMetadata, MetadataUpdate};
