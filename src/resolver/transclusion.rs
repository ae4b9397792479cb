//! TransclusionResolver

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::errors::{BankError, BankResult};
use crate::graph::DependencyGraph;
use crate::hashing::ContentHash;
use crate::index::DocumentSource;
use crate::markdown::{
    find_section, parse_sections, resolve_target, section_text, DirectiveSpan, LinkExtractor,
};
use crate::observability::{log_event_with_fields, Event};

use super::context::{ResolutionContext, ResolveOptions};

/// Output of one top-level resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub name: String,
    pub content: String,
    /// Hash of the requested document's own bytes
    pub hash: ContentHash,
    /// Inclusion edges `(from, to)` followed during resolution
    pub discovered_edges: Vec<(String, String)>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

type CacheKey = (String, ContentHash);

/// An expanded document and the deepest inclusion path beneath it
#[derive(Debug, Clone)]
struct Fragment {
    content: String,
    deepest: Vec<String>,
}

impl Fragment {
    fn leaf(content: String) -> Self {
        Self {
            content,
            deepest: Vec::new(),
        }
    }
}

/// Recursive inclusion expander with a `(name, hash)` keyed cache
#[derive(Debug)]
pub struct TransclusionResolver {
    extractor: LinkExtractor,
    cache: Mutex<HashMap<CacheKey, Fragment>>,
}

impl Default for TransclusionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TransclusionResolver {
    pub fn new() -> Self {
        Self {
            extractor: LinkExtractor::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    // Entries are plain strings, so a poisoned cache is still usable
    fn cache(&self) -> MutexGuard<'_, HashMap<CacheKey, Fragment>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fully expand `name`
    pub fn resolve<S: DocumentSource>(
        &self,
        source: &S,
        name: &str,
        options: &ResolveOptions,
    ) -> BankResult<ResolvedDocument> {
        let mut ctx = ResolutionContext::new(options);

        let result = ctx
            .check_enter(name)
            .and_then(|_| source.read_document(name))
            .and_then(|(content, hash)| {
                let expanded = self.expand(source, &mut ctx, name, content, &hash)?;
                Ok((expanded.content, hash))
            });

        match result {
            Ok((content, hash)) => {
                log_event_with_fields(
                    Event::ResolveComplete,
                    &[
                        ("name", name),
                        ("cache_hits", &ctx.cache_hits.to_string()),
                        ("cache_misses", &ctx.cache_misses.to_string()),
                    ],
                );
                Ok(ResolvedDocument {
                    name: name.to_string(),
                    content,
                    hash,
                    discovered_edges: ctx.discovered,
                    cache_hits: ctx.cache_hits,
                    cache_misses: ctx.cache_misses,
                })
            }
            Err(err) => {
                log_event_with_fields(
                    Event::ResolveFailed,
                    &[("name", name), ("code", err.code()), ("error", &err.to_string())],
                );
                Err(err)
            }
        }
    }

    fn resolve_inner<S: DocumentSource>(
        &self,
        source: &S,
        ctx: &mut ResolutionContext<'_>,
        name: &str,
    ) -> BankResult<Fragment> {
        ctx.check_enter(name)?;
        let (content, hash) = source.read_document(name)?;
        self.expand(source, ctx, name, content, &hash)
    }

    fn expand<S: DocumentSource>(
        &self,
        source: &S,
        ctx: &mut ResolutionContext<'_>,
        name: &str,
        content: String,
        hash: &ContentHash,
    ) -> BankResult<Fragment> {
        let key = (name.to_string(), hash.clone());
        let cached = self.cache().get(&key).cloned();
        if let Some(fragment) = cached {
            ctx.check_cached(name, &fragment.deepest)?;
            ctx.cache_hits += 1;
            return Ok(fragment);
        }
        ctx.cache_misses += 1;

        let directives = self.extractor.directive_spans(&content);
        if directives.is_empty() {
            let fragment = Fragment::leaf(content);
            self.cache().insert(key, fragment.clone());
            return Ok(fragment);
        }

        ctx.enter(name);
        let expanded = self.substitute(source, ctx, name, &content, &directives);
        ctx.leave(name);
        let expanded = expanded?;

        self.cache().insert(key, expanded.clone());
        Ok(expanded)
    }

    fn substitute<S: DocumentSource>(
        &self,
        source: &S,
        ctx: &mut ResolutionContext<'_>,
        name: &str,
        content: &str,
        directives: &[DirectiveSpan],
    ) -> BankResult<Fragment> {
        let mut output = String::with_capacity(content.len());
        let mut deepest: Vec<String> = Vec::new();
        let mut last = 0;

        for directive in directives {
            let reference = &directive.reference;
            let target = resolve_target(name, &reference.target).ok_or_else(|| {
                BankError::path_violation(
                    reference.target.clone(),
                    format!("inclusion target in '{}' leaves the managed root", name),
                )
            })?;
            ctx.discovered.push((name.to_string(), target.clone()));

            let resolved = self.resolve_inner(source, ctx, &target)?;
            if resolved.deepest.len() + 1 > deepest.len() {
                deepest = std::iter::once(target.clone())
                    .chain(resolved.deepest.iter().cloned())
                    .collect();
            }

            let resolved = resolved.content;
            let fragment = match &reference.anchor {
                None => resolved.as_str(),
                Some(anchor) => {
                    let sections = parse_sections(&resolved);
                    let section = find_section(&sections, anchor).ok_or_else(|| {
                        BankError::MissingSection {
                            document: target.clone(),
                            section: anchor.clone(),
                        }
                    })?;
                    section_text(&resolved, section)
                }
            };

            output.push_str(&content[last..directive.span.start]);
            output.push_str(strip_trailing_newline(fragment));
            last = directive.span.end;
        }

        output.push_str(&content[last..]);
        Ok(Fragment {
            content: output,
            deepest,
        })
    }

    /// Drop cached expansions of `name` and of everything that depends on it
    pub fn invalidate(&self, name: &str, graph: &DependencyGraph) -> usize {
        let mut affected: HashSet<String> = graph.transitive_dependents(name).into_iter().collect();
        affected.insert(name.to_string());

        let mut cache = self.cache();
        let before = cache.len();
        cache.retain(|(cached_name, _), _| !affected.contains(cached_name));
        before - cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache().len()
    }
}

fn strip_trailing_newline(fragment: &str) -> &str {
    match fragment.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => fragment,
    }
}
