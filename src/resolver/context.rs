//! Per-call resolution state

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::errors::{BankError, BankResult};

/// Shared flag a caller sets to abort an in-flight resolution
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caller-supplied bounds for one resolution
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Deepest inclusion level allowed; the requested document is depth 0
    pub max_depth: Option<usize>,
    pub cancel: Option<CancellationFlag>,
    pub deadline: Option<Instant>,
}

impl ResolveOptions {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            ..Self::default()
        }
    }
}

/// State threaded through one top-level resolution
#[derive(Debug)]
pub(crate) struct ResolutionContext<'a> {
    options: &'a ResolveOptions,
    chain: Vec<String>,
    visiting: HashSet<String>,
    pub discovered: Vec<(String, String)>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(options: &'a ResolveOptions) -> Self {
        Self {
            options,
            chain: Vec::new(),
            visiting: HashSet::new(),
            discovered: Vec::new(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    fn chain_with(&self, name: &str) -> Vec<String> {
        let mut chain = self.chain.clone();
        chain.push(name.to_string());
        chain
    }

    /// Checks run before expanding `name`: cancellation, cycles, depth
    pub fn check_enter(&self, name: &str) -> BankResult<()> {
        let cancelled = self
            .options
            .cancel
            .as_ref()
            .map(|flag| flag.is_cancelled())
            .unwrap_or(false);
        let expired = self
            .options
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);
        if cancelled || expired {
            return Err(BankError::Cancelled {
                chain: self.chain_with(name),
            });
        }

        if self.visiting.contains(name) {
            return Err(BankError::CircularTransclusion {
                chain: self.chain_with(name),
            });
        }

        if let Some(max_depth) = self.options.max_depth {
            if self.chain.len() > max_depth {
                return Err(BankError::DepthExceeded {
                    chain: self.chain_with(name),
                    max_depth,
                });
            }
        }

        Ok(())
    }

    /// Depth check for a cached expansion of `name`; `below` is its deepest
    /// inclusion path, one entry per level under `name`
    pub fn check_cached(&self, name: &str, below: &[String]) -> BankResult<()> {
        if let Some(max_depth) = self.options.max_depth {
            if self.chain.len() + below.len() > max_depth {
                let mut chain = self.chain_with(name);
                let take = (max_depth + 1).saturating_sub(self.chain.len());
                chain.extend(below.iter().take(take).cloned());
                return Err(BankError::DepthExceeded { chain, max_depth });
            }
        }
        Ok(())
    }

    pub fn enter(&mut self, name: &str) {
        self.visiting.insert(name.to_string());
        self.chain.push(name.to_string());
    }

    pub fn leave(&mut self, name: &str) {
        self.visiting.remove(name);
        self.chain.pop();
    }
}
