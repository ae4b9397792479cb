//! Transclusion resolver
//!
//! Assembles a document's fully expanded content by replacing every
//! inclusion directive with the resolved content of its target.
//!
//! Per top-level call the resolver threads an explicit `ResolutionContext`
//! through the recursion:
//! - the chain of documents currently being expanded (cycle detection)
//! - the current depth (optional depth limit)
//! - the caller's cancellation flag and deadline
//!
//! Resolved documents are cached by `(name, content hash)` across calls.
//! Entries are invalidated through the dependency graph's reverse edges
//! when a document changes.

mod context;
mod transclusion;

pub use context::{CancellationFlag, ResolveOptions};
pub use transclusion::{ResolvedDocument, TransclusionResolver};
