//! Document dependency graph
//!
//! Directed graph where:
//! - Nodes are tracked document names
//! - Edges point from the referencing document to the referenced one
//!   (A → B means A depends on B)
//!
//! The graph is a derived, rebuildable cache over the metadata index. It is
//! rebuilt by full rescan and replaced whole, never patched incrementally,
//! except for dynamic edges discovered while resolving inclusions.
//!
//! Link edges may legally form cycles; they are diagnostic only. Inclusion
//! edges must not cycle within anything that is ordered or resolved.

mod dependency;
mod order;

pub use dependency::DependencyGraph;

use serde::{Deserialize, Serialize};

/// Why one document depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Link,
    Transclusion,
}

/// Edge weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeData {
    pub kind: EdgeKind,
    /// Discovered at resolution time rather than by scanning
    pub dynamic: bool,
}

/// One edge, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub dynamic: bool,
}

/// A reference whose target is not a tracked document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DanglingRef {
    pub from: String,
    /// Target as written in the source document
    pub target: String,
    pub kind: EdgeKind,
    pub line_number: usize,
}
