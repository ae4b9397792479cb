//! Graph construction and direct lookups

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::errors::{BankError, BankResult};
use crate::index::{DocumentMetadata, DocumentSource};
use crate::markdown::{resolve_target, LinkExtractor, LinkRef, TransclusionRef};
use crate::observability::{log_event_with_fields, Event};

use super::{DanglingRef, DependencyEdge, EdgeData, EdgeKind};

/// Link and inclusion graph over tracked documents
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub(super) graph: DiGraph<String, EdgeData>,
    pub(super) nodes: HashMap<String, NodeIndex>,
    dangling: Vec<DanglingRef>,
}

impl DependencyGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the metadata index; only documents that exist become nodes
    pub fn from_metadata(documents: &BTreeMap<String, DocumentMetadata>) -> Self {
        let mut graph = Self::new();
        for (name, meta) in documents {
            if meta.exists {
                graph.add_node(name);
            }
        }
        for (name, meta) in documents {
            if meta.exists {
                graph.add_references(name, &meta.links, &meta.transclusions);
            }
        }
        graph.dangling.sort();
        graph
    }

    /// Rescan every document in `source` and build a fresh graph; unreadable
    /// documents are left out
    pub fn build_from_links<S: DocumentSource>(
        source: &S,
        extractor: &LinkExtractor,
    ) -> BankResult<Self> {
        let mut scanned = Vec::new();
        for name in source.list_documents()? {
            let (content, _hash) = match source.read_document(&name) {
                Ok(read) => read,
                Err(BankError::NotFound(_)) => continue,
                Err(err @ BankError::IoFailure { .. }) => {
                    log_event_with_fields(
                        Event::DocumentSkipped,
                        &[("name", &name), ("error", &err.to_string())],
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            let links = extractor.parse_links(&content);
            let transclusions = extractor.parse_transclusions(&content);
            scanned.push((name, links, transclusions));
        }

        let mut graph = Self::new();
        for (name, _, _) in &scanned {
            graph.add_node(name);
        }
        for (name, links, transclusions) in &scanned {
            graph.add_references(name, links, transclusions);
        }
        graph.dangling.sort();
        Ok(graph)
    }

    fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    fn add_references(&mut self, from: &str, links: &[LinkRef], transclusions: &[TransclusionRef]) {
        let refs = links
            .iter()
            .map(|l| (l.target.as_str(), l.line_number, EdgeKind::Link))
            .chain(
                transclusions
                    .iter()
                    .map(|t| (t.target.as_str(), t.line_number, EdgeKind::Transclusion)),
            );

        for (target, line_number, kind) in refs {
            let resolved = resolve_target(from, target);
            match resolved.as_deref().and_then(|to| self.nodes.get(to).copied()) {
                Some(to) => {
                    self.insert_edge(from, to, kind, false);
                }
                // Pure anchors and external URLs are not references
                None if resolved.is_none() && kind == EdgeKind::Link => {}
                None => self.dangling.push(DanglingRef {
                    from: from.to_string(),
                    target: target.to_string(),
                    kind,
                    line_number,
                }),
            }
        }
    }

    fn insert_edge(&mut self, from: &str, to: NodeIndex, kind: EdgeKind, dynamic: bool) -> bool {
        let from = match self.nodes.get(from) {
            Some(&idx) => idx,
            None => return false,
        };
        let exists = self
            .graph
            .edges_connecting(from, to)
            .any(|e| e.weight().kind == kind);
        if exists {
            return false;
        }
        self.graph.add_edge(from, to, EdgeData { kind, dynamic });
        true
    }

    /// Record an inclusion edge discovered at resolution time. Unknown
    /// endpoints are added as nodes. Returns whether the edge is new.
    pub fn add_dynamic_edge(&mut self, from: &str, to: &str) -> bool {
        self.add_node(from);
        let to = self.add_node(to);
        self.insert_edge(from, to, EdgeKind::Transclusion, true)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let idx = match self.nodes.get(name) {
            Some(&idx) => idx,
            None => return Vec::new(),
        };
        let names: BTreeSet<String> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.into_iter().collect()
    }

    /// Documents `name` references directly, sorted
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Documents that reference `name` directly, sorted
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Everything that depends on `name`, directly or transitively, sorted
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let start = match self.nodes.get(name) {
            Some(&idx) => idx,
            None => return Vec::new(),
        };

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        let mut names: Vec<String> = visited
            .into_iter()
            .filter(|&idx| idx != start)
            .map(|idx| self.graph[idx].clone())
            .collect();
        names.sort();
        names
    }

    /// Whether `name` is a node
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Node names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every edge, sorted
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .edge_references()
            .map(|e| DependencyEdge {
                from: self.graph[e.source()].clone(),
                to: self.graph[e.target()].clone(),
                kind: e.weight().kind,
                dynamic: e.weight().dynamic,
            })
            .collect();
        edges.sort();
        edges
    }

    /// References to documents that are not tracked
    pub fn dangling(&self) -> &[DanglingRef] {
        &self.dangling
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
