//! Transclusion Resolution Tests
//!
//! Tests for resolution invariants:
//! - A document without directives resolves to its raw content
//! - Every inclusion cycle terminates with the full chain
//! - Depth limits, cancellation and deadlines abort cleanly
//! - Anchored includes take one section or fail explicitly

use std::time::{Duration, Instant};

use memorybank::{BankConfig, BankError, CancellationFlag, MemoryBank, ResolveOptions};
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

// =============================================================================
// Identity and Expansion
// =============================================================================

/// Resolution of a directive-free document is the identity.
#[test]
fn test_identity_without_directives() {
    let temp = TempDir::new().unwrap();
    let raw = "# Brief\n\nSee [context](context.md).\n\n```\n{{include:context.md}}\n```\n";
    let bank = bank_with(&temp, &[("brief.md", raw), ("context.md", "ctx")]);

    let resolved = bank.resolve("brief.md", None).unwrap();
    assert_eq!(resolved.content, raw);
    assert!(resolved.discovered_edges.is_empty());
}

/// Nested includes across directories expand depth first.
#[test]
fn test_nested_expansion() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("index.md", "Start\n{{include:core/brief.md}}\nEnd\n"),
            ("core/brief.md", "Brief: {{include:product.md}}\n"),
            ("core/product.md", "a product\n"),
        ],
    );

    let resolved = bank.resolve("index.md", None).unwrap();
    assert_eq!(resolved.content, "Start\nBrief: a product\nEnd\n");
    assert_eq!(
        resolved.discovered_edges,
        vec![
            ("index.md".to_string(), "core/brief.md".to_string()),
            ("core/brief.md".to_string(), "core/product.md".to_string()),
        ]
    );
}

/// The same document included twice is expanded twice.
#[test]
fn test_repeated_include_is_not_a_cycle() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "{{include:b.md}}|{{include:b.md}}"), ("b.md", "B")]);
    assert_eq!(bank.resolve("a.md", None).unwrap().content, "B|B");
}

// =============================================================================
// Anchors
// =============================================================================

/// An anchored include takes only the named section, heading included.
#[test]
fn test_anchored_section() {
    let temp = TempDir::new().unwrap();
    let tech = "# Tech\n\n## Stack\n- rust\n### Detail\nfine\n## Deploy\nship it\n";
    let bank = bank_with(
        &temp,
        &[("tech.md", tech), ("summary.md", "{{include:tech.md#stack}}\n---\n")],
    );

    assert_eq!(
        bank.resolve("summary.md", None).unwrap().content,
        "## Stack\n- rust\n### Detail\nfine\n---\n"
    );
}

/// A section produced by an inner include can be anchored to.
#[test]
fn test_anchor_applies_to_resolved_content() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("parts.md", "## Included\nfrom parts\n"),
            ("outer.md", "# Outer\n{{include:parts.md}}\n"),
            ("top.md", "{{include:outer.md#Included}}"),
        ],
    );
    assert_eq!(bank.resolve("top.md", None).unwrap().content, "## Included\nfrom parts");
}

/// A missing section is an explicit failure, never an empty substitution.
#[test]
fn test_missing_section_fails() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "# Only\n"), ("b.md", "x {{include:a.md#Absent}} y")]);

    let err = bank.resolve("b.md", None).unwrap_err();
    assert_eq!(err.code(), "MB_MISSING_SECTION");
    assert_eq!(err.to_string(), "Section 'Absent' not found in 'a.md'");
}

// =============================================================================
// Termination
// =============================================================================

/// A three-document cycle terminates and names the chain.
#[test]
fn test_cycle_terminates() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("a.md", "{{include:b.md}}"),
            ("b.md", "{{include:c.md}}"),
            ("c.md", "{{include:a.md}}"),
        ],
    );

    match bank.resolve("b.md", None).unwrap_err() {
        BankError::CircularTransclusion { chain } => {
            assert_eq!(chain, vec!["b.md", "c.md", "a.md", "b.md"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Self-inclusion terminates.
#[test]
fn test_self_inclusion_terminates() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("me.md", "I am {{include:me.md}}")]);

    let err = bank.resolve("me.md", None).unwrap_err();
    assert_eq!(err.to_string(), "Circular transclusion: me.md → me.md");
}

/// Exceeding the depth limit names the chain that went too deep.
#[test]
fn test_depth_limit() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("l0.md", "{{include:l1.md}}"),
            ("l1.md", "{{include:l2.md}}"),
            ("l2.md", "{{include:l3.md}}"),
            ("l3.md", "bottom"),
        ],
    );

    assert_eq!(bank.resolve("l0.md", Some(3)).unwrap().content, "bottom");
    match bank.resolve("l0.md", Some(2)).unwrap_err() {
        BankError::DepthExceeded { chain, max_depth } => {
            assert_eq!(max_depth, 2);
            assert_eq!(chain, vec!["l0.md", "l1.md", "l2.md", "l3.md"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// The depth limit holds even when an earlier unbounded call cached the chain.
#[test]
fn test_depth_limit_after_cached_resolution() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[("a.md", "{{include:b.md}}"), ("b.md", "{{include:c.md}}"), ("c.md", "c")],
    );

    assert_eq!(bank.resolve("a.md", None).unwrap().content, "c");
    assert_eq!(bank.resolve("a.md", Some(0)).unwrap_err().code(), "MB_DEPTH_EXCEEDED");
    match bank.resolve("a.md", Some(1)).unwrap_err() {
        BankError::DepthExceeded { chain, max_depth } => {
            assert_eq!(max_depth, 1);
            assert_eq!(chain, vec!["a.md", "b.md", "c.md"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bank.resolve("a.md", Some(2)).unwrap().content, "c");
}

/// A cancelled flag or a past deadline aborts resolution.
#[test]
fn test_cancellation_and_deadline() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "{{include:b.md}}"), ("b.md", "b")]);

    let flag = CancellationFlag::new();
    flag.cancel();
    let options = ResolveOptions {
        cancel: Some(flag),
        ..ResolveOptions::default()
    };
    assert_eq!(bank.resolve_with("a.md", &options).unwrap_err().code(), "MB_CANCELLED");

    let options = ResolveOptions {
        deadline: Some(Instant::now() - Duration::from_millis(5)),
        ..ResolveOptions::default()
    };
    assert_eq!(bank.resolve_with("a.md", &options).unwrap_err().code(), "MB_CANCELLED");

    // Failed resolutions leave nothing behind
    assert_eq!(bank.resolve("a.md", None).unwrap().content, "b");
}

/// An include that climbs out of the root is a path violation.
#[test]
fn test_include_outside_root() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "{{include:../../secret.md}}")]);
    assert_eq!(bank.resolve("a.md", None).unwrap_err().code(), "MB_PATH_VIOLATION");
}

/// An include of a document that does not exist is NotFound.
#[test]
fn test_include_missing_document() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "{{include:nowhere.md}}")]);
    assert_eq!(bank.resolve("a.md", None).unwrap_err().code(), "MB_NOT_FOUND");
}

// =============================================================================
// Cache Invalidation
// =============================================================================

/// Changes propagate through every level of inclusion.
#[test]
fn test_transitive_invalidation() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(
        &temp,
        &[
            ("leaf.md", "v1"),
            ("mid.md", "({{include:leaf.md}})"),
            ("top.md", "[{{include:mid.md}}]"),
        ],
    );
    assert_eq!(bank.resolve("top.md", None).unwrap().content, "[(v1)]");

    let second = bank.resolve("top.md", None).unwrap();
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.cache_misses, 0);

    bank.write("leaf.md", "v2", None).unwrap();
    let third = bank.resolve("top.md", None).unwrap();
    assert_eq!(third.content, "[(v2)]");
    assert_eq!(third.cache_misses, 3);
}

/// Removing an include drops the old dependency's influence.
#[test]
fn test_removed_include_invalidates() {
    let temp = TempDir::new().unwrap();
    let bank = bank_with(&temp, &[("a.md", "A"), ("b.md", "{{include:a.md}}")]);
    assert_eq!(bank.resolve("b.md", None).unwrap().content, "A");

    bank.write("b.md", "standalone", None).unwrap();
    assert_eq!(bank.resolve("b.md", None).unwrap().content, "standalone");
    bank.write("a.md", "A2", None).unwrap();
    assert_eq!(bank.resolve("b.md", None).unwrap().content, "standalone");
}
