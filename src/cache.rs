//! Bounded verdict cache
//!
//! Maps request URLs to block/allow verdicts. When full, the oldest quarter
//! of insertions is dropped in one pass. A dropped entry only costs a
//! recompute, never a wrong verdict.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use log::trace;
use parking_lot::Mutex;
use serde::Serialize;

/// Default number of cached verdicts
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Cache occupancy and hit counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently cached
    pub entries: usize,
    /// Configured maximum
    pub capacity: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to compute
    pub misses: u64,
    /// Entries dropped by eviction
    pub evicted: u64,
}

#[derive(Default)]
struct Entries {
    verdicts: AHashMap<String, bool>,
    insertion_order: VecDeque<String>,
}

/// URL → verdict memo with quarter eviction
pub struct DecisionCache {
    entries: Mutex<Entries>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
}

impl DecisionCache {
    /// Create a cache holding at most `capacity` verdicts.
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Return the cached verdict for `url`, or compute and cache it.
    ///
    /// `compute` runs outside the lock, at most once per call.
    pub fn get_or_compute<F>(&self, url: &str, compute: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if let Some(&verdict) = self.entries.lock().verdicts.get(url) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return verdict;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let verdict = compute();
        self.insert(url, verdict);
        verdict
    }

    /// Cached verdict, if any; does not touch hit counters
    pub fn peek(&self, url: &str) -> Option<bool> {
        self.entries.lock().verdicts.get(url).copied()
    }

    fn insert(&self, url: &str, verdict: bool) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.verdicts.contains_key(url) {
            return;
        }
        if entries.verdicts.len() >= self.capacity {
            let dropped = self.evict_oldest_quarter(&mut entries);
            self.evicted.fetch_add(dropped as u64, Ordering::Relaxed);
            trace!("Decision cache evicted {} entries", dropped);
        }
        entries.verdicts.insert(url.to_owned(), verdict);
        entries.insertion_order.push_back(url.to_owned());
    }

    fn evict_oldest_quarter(&self, entries: &mut Entries) -> usize {
        let target = (self.capacity / 4).max(1);
        let mut dropped = 0;
        while dropped < target {
            let Some(oldest) = entries.insertion_order.pop_front() else {
                break;
            };
            if entries.verdicts.remove(&oldest).is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Drop every cached verdict
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.verdicts.clear();
        entries.insertion_order.clear();
    }

    /// Number of cached verdicts
    pub fn len(&self) -> usize {
        self.entries.lock().verdicts.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy and counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_hit_skips_compute() {
        let cache = DecisionCache::new(16);
        let calls = Cell::new(0);

        let first = cache.get_or_compute("https://a.com/", || {
            calls.set(calls.get() + 1);
            true
        });
        let second = cache.get_or_compute("https://a.com/", || {
            calls.set(calls.get() + 1);
            false
        });

        assert!(first);
        assert!(second);
        assert_eq!(calls.get(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let capacity = 100;
        let cache = DecisionCache::new(capacity);

        for i in 0..=capacity {
            cache.get_or_compute(&format!("https://site{}.com/", i), || i % 2 == 0);
        }

        assert!(cache.len() <= capacity);
        assert_eq!(cache.len(), capacity - capacity / 4 + 1);
        assert_eq!(cache.stats().evicted, (capacity / 4) as u64);
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let cache = DecisionCache::new(4);
        for i in 0..4 {
            cache.get_or_compute(&format!("u{}", i), || true);
        }
        cache.get_or_compute("u4", || false);

        assert_eq!(cache.peek("u0"), None);
        assert_eq!(cache.peek("u1"), Some(true));
        assert_eq!(cache.peek("u4"), Some(false));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_tiny_capacity_still_bounded() {
        let cache = DecisionCache::new(1);
        cache.get_or_compute("a", || true);
        cache.get_or_compute("b", || false);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek("b"), Some(false));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = DecisionCache::new(0);
        let calls = Cell::new(0);
        for _ in 0..3 {
            cache.get_or_compute("a", || {
                calls.set(calls.get() + 1);
                true
            });
        }
        assert_eq!(calls.get(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = DecisionCache::new(8);
        cache.get_or_compute("a", || true);
        cache.clear();
        assert!(cache.is_empty());

        let mut recomputed = false;
        cache.get_or_compute("a", || {
            recomputed = true;
            false
        });
        assert!(recomputed);
        assert_eq!(cache.peek("a"), Some(false));
    }

    #[test]
    fn test_concurrent_access_stays_bounded() {
        let cache = Arc::new(DecisionCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let url = format!("https://t{}.com/{}", t, i % 97);
                        cache.get_or_compute(&url, || i % 3 == 0);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 64);
    }
}
