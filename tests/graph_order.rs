//! Graph Ordering Tests
//!
//! Tests for dependency graph invariants:
//! - Every dependency is loaded strictly before its dependents
//! - Ordering is deterministic
//! - Link cycles are tolerated; inclusion cycles are reported
//! - The graph always reflects the index after a write or rebuild

use std::collections::HashMap;

use memorybank::graph::EdgeKind;
use memorybank::{BankConfig, BankError, MemoryBank};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn bank_with(temp: &TempDir, docs: &[(&str, &str)]) -> MemoryBank {
    let bank = MemoryBank::open(BankConfig::with_root(temp.path())).unwrap();
    for (name, content) in docs {
        bank.write(name, content, None).unwrap();
    }
    bank
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Assert every edge of the bank's graph points backwards in `order`
fn assert_topological(bank: &MemoryBank, order: &[String]) {
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    for edge in bank.graph().unwrap().edges() {
        let dep = position.get(edge.to.as_str());
        let dependent = position.get(edge.from.as_str());
        if let (Some(dep), Some(dependent)) = (dep, dependent) {
            assert!(dep < dependent, "{} must load before {}", edge.to, edge.from);
        }
    }
}

// =============================================================================
// Topological Order
// =============================================================================

/// A layered project loads foundations first.
#[test]
fn test_layered_project_order() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("projectbrief.md", "# Brief"),
            ("productContext.md", "{{include:projectbrief.md}}"),
            ("systemPatterns.md", "[brief](projectbrief.md)"),
            ("techContext.md", "[brief](projectbrief.md)"),
            (
                "activeContext.md",
                "{{include:productContext.md}} [p](systemPatterns.md) [t](techContext.md)",
            ),
            ("progress.md", "{{include:activeContext.md}}"),
        ],
    );

    let order = bank.loading_order(None).unwrap();
    assert_eq!(
        order,
        names(&[
            "projectbrief.md",
            "productContext.md",
            "systemPatterns.md",
            "techContext.md",
            "activeContext.md",
            "progress.md",
        ])
    );
    assert_topological(&bank, &order);
    assert_eq!(bank.loading_order(None).unwrap(), order);
}

/// A diamond keeps every edge satisfied.
#[test]
fn test_diamond() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("top.md", "{{include:left.md}}{{include:right.md}}"),
            ("left.md", "{{include:base.md}}"),
            ("right.md", "[b](base.md)"),
            ("base.md", "base"),
        ],
    );

    let order = bank.loading_order(None).unwrap();
    assert_eq!(order.first().map(String::as_str), Some("base.md"));
    assert_eq!(order.last().map(String::as_str), Some("top.md"));
    assert_topological(&bank, &order);
}

/// A subset orders only the named documents.
#[test]
fn test_subset_order() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("a.md", "{{include:b.md}}"),
            ("b.md", "b"),
            ("c.md", "{{include:a.md}}"),
        ],
    );

    assert_eq!(
        bank.loading_order(Some(&names(&["c.md", "a.md"]))).unwrap(),
        names(&["a.md", "c.md"])
    );
    assert_eq!(
        bank.loading_order(Some(&names(&["ghost.md"]))).unwrap_err().code(),
        "MB_NOT_FOUND"
    );
}

// =============================================================================
// Cycles
// =============================================================================

/// Mutual links still produce a complete order.
#[test]
fn test_link_cycle_tolerated() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[("a.md", "[b](b.md)"), ("b.md", "[a](a.md)"), ("c.md", "{{include:b.md}}")],
    );

    let order = bank.loading_order(None).unwrap();
    assert_eq!(order.len(), 3);
    assert_eq!(order.last().map(String::as_str), Some("c.md"));
    assert_eq!(bank.find_cycles().unwrap(), vec![names(&["a.md", "b.md"])]);
}

/// Inclusion cycles fail ordering with a named chain.
#[test]
fn test_inclusion_cycle_reported() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("x.md", "{{include:y.md}}"),
            ("y.md", "{{include:z.md}}"),
            ("z.md", "{{include:x.md}}"),
            ("free.md", "free"),
        ],
    );

    match bank.loading_order(None).unwrap_err() {
        BankError::CircularTransclusion { chain } => {
            assert_eq!(chain, names(&["x.md", "y.md", "z.md", "x.md"]))
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bank.find_cycles().unwrap(), vec![names(&["x.md", "y.md", "z.md"])]);
    assert_eq!(bank.loading_order(Some(&names(&["free.md"]))).unwrap(), names(&["free.md"]));
}

/// Breaking a cycle with a write restores ordering.
#[test]
fn test_write_breaks_cycle() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "{{include:b.md}}"), ("b.md", "{{include:a.md}}")]);
    assert!(bank.loading_order(None).is_err());

    bank.write("b.md", "leaf", None).unwrap();
    assert_eq!(bank.loading_order(None).unwrap(), names(&["b.md", "a.md"]));
    assert!(bank.find_cycles().unwrap().is_empty());
}

// =============================================================================
// Graph Contents
// =============================================================================

/// Edges carry their kind; unknown targets are kept as dangling references.
#[test]
fn test_edges_and_dangling() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("a.md", "a"),
            ("b.md", "[a](a.md) {{include:a.md}} [gone](gone.md) [web](https://example.com)"),
        ],
    );

    let graph = bank.graph().unwrap();
    let kinds: Vec<EdgeKind> = graph.edges().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EdgeKind::Link, EdgeKind::Transclusion]);

    let dangling = graph.dangling();
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[0].from, "b.md");
    assert_eq!(dangling[0].target, "gone.md");

    // Writing the missing document turns the dangling link into an edge
    bank.write("gone.md", "back", None).unwrap();
    assert!(bank.graph().unwrap().dangling().is_empty());
    assert_eq!(bank.dependencies_of("b.md").unwrap(), names(&["a.md", "gone.md"]));
}
