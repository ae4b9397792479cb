//! Loading order and cycle enumeration

use std::collections::{BTreeSet, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::errors::{BankError, BankResult};

use super::dependency::DependencyGraph;
use super::EdgeKind;

impl DependencyGraph {
    /// Dependencies-first order over `subset` (every node when `None`).
    ///
    /// Kahn's algorithm with ties broken by name. A stall caused only by
    /// link edges is broken by releasing the smallest-named node whose
    /// remaining dependencies are all links; a stall held by inclusion
    /// edges fails with `CircularTransclusion`.
    pub fn loading_order(&self, subset: Option<&[String]>) -> BankResult<Vec<String>> {
        let selected: HashSet<NodeIndex> = match subset {
            None => self.graph.node_indices().collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    self.nodes
                        .get(name)
                        .copied()
                        .ok_or_else(|| BankError::NotFound(name.clone()))
                })
                .collect::<BankResult<_>>()?,
        };

        let sub: DiGraph<String, EdgeKind> = self.graph.filter_map(
            |idx, name| selected.contains(&idx).then(|| name.clone()),
            |_, data| Some(data.kind),
        );

        let count = sub.node_count();
        let mut emitted = vec![false; count];
        let mut pending: Vec<usize> = sub
            .node_indices()
            .map(|idx| sub.edges_directed(idx, Direction::Outgoing).count())
            .collect();
        let mut ready: BTreeSet<(&str, NodeIndex)> = sub
            .node_indices()
            .filter(|idx| pending[idx.index()] == 0)
            .map(|idx| (sub[idx].as_str(), idx))
            .collect();

        let mut order = Vec::with_capacity(count);
        while order.len() < count {
            let next = match ready.pop_first() {
                Some((_, idx)) => idx,
                None => match Self::link_only_candidate(&sub, &emitted) {
                    Some(idx) => idx,
                    None => {
                        let chain = Self::blocking_cycle(&sub, &emitted);
                        return Err(BankError::CircularTransclusion { chain });
                    }
                },
            };

            emitted[next.index()] = true;
            order.push(sub[next].clone());

            for edge in sub.edges_directed(next, Direction::Incoming) {
                let dependent = edge.source();
                if emitted[dependent.index()] {
                    continue;
                }
                pending[dependent.index()] -= 1;
                if pending[dependent.index()] == 0 {
                    ready.insert((sub[dependent].as_str(), dependent));
                }
            }
        }

        Ok(order)
    }

    fn link_only_candidate(sub: &DiGraph<String, EdgeKind>, emitted: &[bool]) -> Option<NodeIndex> {
        sub.node_indices()
            .filter(|idx| !emitted[idx.index()])
            .filter(|&idx| {
                sub.edges_directed(idx, Direction::Outgoing)
                    .filter(|e| !emitted[e.target().index()])
                    .all(|e| *e.weight() == EdgeKind::Link)
            })
            .min_by(|a, b| sub[*a].cmp(&sub[*b]))
    }

    // Every unemitted node has an unemitted inclusion dependency, so
    // following the smallest such target from the smallest node must repeat
    fn blocking_cycle(sub: &DiGraph<String, EdgeKind>, emitted: &[bool]) -> Vec<String> {
        let start = sub
            .node_indices()
            .filter(|idx| !emitted[idx.index()])
            .min_by(|a, b| sub[*a].cmp(&sub[*b]));

        let mut path: Vec<NodeIndex> = Vec::new();
        let mut current = start;
        while let Some(idx) = current {
            if let Some(pos) = path.iter().position(|&p| p == idx) {
                let mut chain: Vec<String> = path[pos..].iter().map(|&p| sub[p].clone()).collect();
                chain.push(sub[idx].clone());
                return chain;
            }
            path.push(idx);
            current = sub
                .edges_directed(idx, Direction::Outgoing)
                .filter(|e| *e.weight() == EdgeKind::Transclusion && !emitted[e.target().index()])
                .map(|e| e.target())
                .min_by(|a, b| sub[*a].cmp(&sub[*b]));
        }

        path.iter().map(|&p| sub[p].clone()).collect()
    }

    /// Whether any cycle exists over link and inclusion edges
    pub fn has_cycle(&self) -> bool {
        !self.find_cycles().is_empty()
    }

    /// One ordered chain per strongly connected component that cycles,
    /// over link and inclusion edges
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let sub = self.graph.map(|_, name| name.clone(), |_, data| data.kind);
        cycles_in(&sub)
    }

    /// Cycles made of inclusion edges only
    pub fn transclusion_cycles(&self) -> Vec<Vec<String>> {
        let sub = self.graph.filter_map(
            |_, name| Some(name.clone()),
            |_, data| (data.kind == EdgeKind::Transclusion).then_some(data.kind),
        );
        cycles_in(&sub)
    }
}

/// Each chain starts at the smallest name of its component and lists the
/// cycle in edge order without repeating the start
fn cycles_in(graph: &DiGraph<String, EdgeKind>) -> Vec<Vec<String>> {
    let mut cycles: Vec<Vec<String>> = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| {
            let members: HashSet<NodeIndex> = scc.iter().copied().collect();
            let start = scc.iter().copied().min_by(|a, b| graph[*a].cmp(&graph[*b]))?;
            let mut path = vec![start];
            let mut seen = HashSet::from([start]);
            if close_cycle(graph, &members, start, &mut path, &mut seen) {
                Some(path.iter().map(|&idx| graph[idx].clone()).collect())
            } else {
                None
            }
        })
        .collect();
    cycles.sort();
    cycles
}

// Depth-first search inside one component for a path back to `start`
fn close_cycle(
    graph: &DiGraph<String, EdgeKind>,
    members: &HashSet<NodeIndex>,
    start: NodeIndex,
    path: &mut Vec<NodeIndex>,
    seen: &mut HashSet<NodeIndex>,
) -> bool {
    let current = match path.last() {
        Some(&idx) => idx,
        None => return false,
    };

    let mut next: Vec<NodeIndex> = graph
        .neighbors_directed(current, Direction::Outgoing)
        .filter(|n| members.contains(n))
        .collect();
    next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
    next.dedup();

    for neighbor in next {
        if neighbor == start {
            return true;
        }
        if seen.insert(neighbor) {
            path.push(neighbor);
            if close_cycle(graph, members, start, path, seen) {
                return true;
            }
            path.pop();
        }
    }
    false
}
