//! Filter engine for netsieve request blocking
//!
//! The engine owns the current generation: an immutable [`RuleStore`] paired
//! with the [`DecisionCache`] of verdicts computed against it. A reload
//! builds the next store off the hot path and swaps in a whole new
//! generation, so a verdict computed against an old store can only land in
//! the old, already detached cache.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::cache::{CacheStats, DecisionCache};
use crate::config::CacheConfig;
use crate::filters::{FileSource, ListSource};
use crate::matcher::{BucketMatcher, MatchContext, RequestMatcher};
use crate::store::{ParseReport, RuleStore};
use crate::utils::PerfTimer;

struct Generation {
    id: u64,
    store: Arc<RuleStore>,
    cache: DecisionCache,
}

/// Engine state for diagnostics display
#[derive(Debug, Clone, Serialize)]
pub struct EngineDiagnostics {
    /// Number of installed stores since creation
    pub generation: u64,
    /// Parse summary of the installed store
    pub report: ParseReport,
    /// Decision cache counters for the installed store
    pub cache: CacheStats,
}

/// Thread-safe block/allow decision engine
pub struct FilterEngine<M = BucketMatcher> {
    current: RwLock<Arc<Generation>>,
    reload_lock: Mutex<()>,
    matcher: M,
    source: Box<dyn ListSource>,
    cache_capacity: usize,
}

impl FilterEngine<BucketMatcher> {
    /// Create an empty engine reading lists from the filesystem
    pub fn new(cache: &CacheConfig) -> Self {
        Self::with_matcher(cache, BucketMatcher)
    }
}

impl Default for FilterEngine<BucketMatcher> {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl<M: RequestMatcher> FilterEngine<M> {
    /// Create an empty engine deciding with `matcher`
    pub fn with_matcher(cache: &CacheConfig, matcher: M) -> Self {
        let cache_capacity = cache.capacity;
        Self {
            current: RwLock::new(Arc::new(Generation {
                id: 0,
                store: Arc::new(RuleStore::empty()),
                cache: DecisionCache::new(cache_capacity),
            })),
            reload_lock: Mutex::new(()),
            matcher,
            source: Box::new(FileSource),
            cache_capacity,
        }
    }

    /// Replace the filter-list source used by [`load`](Self::load)
    pub fn with_source(mut self, source: impl ListSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Read, parse and install every source; returns the new rule count.
    ///
    /// Unreadable sources are logged and left out. If nothing could be read
    /// the engine ends up with an empty store and blocks nothing.
    pub fn load<I, S>(&self, sources: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lines = Vec::new();
        let mut failed = 0usize;

        for source in sources {
            let id = source.as_ref();
            match self.source.read_lines(id) {
                Ok(list) => {
                    debug!("Read {} lines from filter list {}", list.len(), id);
                    lines.extend(list);
                }
                Err(e) => {
                    failed += 1;
                    warn!("Skipping filter list {}: {}", id, e);
                }
            }
        }

        if lines.is_empty() {
            warn!("No filter lines obtained ({} sources failed); installing empty rule set", failed);
        }

        self.load_lines(&lines)
    }

    /// Parse already obtained lines and install them; returns the new rule count
    pub fn load_lines<S>(&self, lines: &[S]) -> usize
    where
        S: AsRef<str> + Sync,
    {
        let timer = PerfTimer::new("rule parse");
        let store = RuleStore::parse(lines);
        let elapsed = timer.stop();

        let report = store.report();
        info!(
            "Parsed {} filter rules ({} skipped, {} ignored) in {:?}",
            report.parsed, report.skipped, report.ignored, elapsed
        );
        self.install(store)
    }

    /// Swap in a prebuilt store with a fresh cache; returns its rule count
    pub fn install(&self, store: RuleStore) -> usize {
        let count = store.total_rule_count();
        let store = Arc::new(store);

        let _reload = self.reload_lock.lock();
        let id = self.current.read().id + 1;
        let next = Arc::new(Generation {
            id,
            store,
            cache: DecisionCache::new(self.cache_capacity),
        });
        *self.current.write() = next;

        info!("Installed rule set generation {} with {} rules", id, count);
        count
    }

    /// Decide whether the request must be blocked.
    ///
    /// Verdicts are memoized per request URL for the installed rule set.
    pub fn should_block(&self, ctx: &MatchContext<'_>) -> bool {
        let generation = self.snapshot();
        generation
            .cache
            .get_or_compute(ctx.request_url, || self.matcher.evaluate(&generation.store, ctx))
    }

    /// Drop every cached verdict without touching the rules
    pub fn clear_cache(&self) {
        self.snapshot().cache.clear();
        info!("Decision cache cleared");
    }

    /// Number of rules in the installed store
    pub fn rule_count(&self) -> usize {
        self.snapshot().store.total_rule_count()
    }

    /// The installed rule store
    pub fn store(&self) -> Arc<RuleStore> {
        Arc::clone(&self.snapshot().store)
    }

    /// Parse, cache and generation state
    pub fn diagnostics(&self) -> EngineDiagnostics {
        let generation = self.snapshot();
        EngineDiagnostics {
            generation: generation.id,
            report: generation.store.report().clone(),
            cache: generation.cache.stats(),
        }
    }

    fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read())
    }
}

impl<M> std::fmt::Debug for FilterEngine<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let generation = self.current.read();
        f.debug_struct("FilterEngine")
            .field("generation", &generation.id)
            .field("rules", &generation.store.total_rule_count())
            .field("cache", &generation.cache)
            .finish()
    }
}
