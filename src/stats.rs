//! Request statistics for netsieve
//!
//! Counters are lock-free on the hot path: totals are atomics, per-host and
//! per-kind tallies live in [`DashMap`]s. The per-host map is capped; once
//! full, blocks on unseen hosts are tallied under [`OTHER_HOSTS`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::Result;
use crate::matcher::ResourceKind;

/// Hosts kept inline by [`StatsCollector::top_blocked_domains`]
const TOP_INLINE: usize = 8;

/// Distinct hosts tracked before blocks are folded into [`OTHER_HOSTS`]
pub const DEFAULT_HOST_LIMIT: usize = 4096;

/// Per-host key collecting blocks once the host limit is reached
pub const OTHER_HOSTS: &str = "(other)";

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Requests seen
    pub total_requests: u64,
    /// Requests blocked
    pub blocked_requests: u64,
    /// Requests allowed
    pub allowed_requests: u64,
    /// Blocked count per host
    pub domains_blocked: HashMap<String, u64>,
    /// Request count per resource kind
    pub request_types: HashMap<String, u64>,
    /// Start of the collection window
    pub since: DateTime<Utc>,
}

impl Stats {
    /// Fraction of requests blocked, 0.0 when nothing was seen
    pub fn block_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.blocked_requests as f64 / self.total_requests as f64
        }
    }
}

/// Thread-safe statistics collector
#[derive(Debug)]
pub struct StatsCollector {
    total: AtomicU64,
    blocked: AtomicU64,
    allowed: AtomicU64,
    domains_blocked: DashMap<String, u64, ahash::RandomState>,
    request_types: DashMap<ResourceKind, u64, ahash::RandomState>,
    since: RwLock<DateTime<Utc>>,
    host_limit: usize,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::with_host_limit(DEFAULT_HOST_LIMIT)
    }

    /// Create an empty collector tracking at most `host_limit` distinct hosts
    pub fn with_host_limit(host_limit: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            domains_blocked: DashMap::with_hasher(ahash::RandomState::new()),
            request_types: DashMap::with_hasher(ahash::RandomState::new()),
            since: RwLock::new(Utc::now()),
            host_limit: host_limit.max(1),
        }
    }

    /// Record a blocked request
    pub fn record_blocked_request(&self, host: &str, kind: ResourceKind) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.blocked.fetch_add(1, Ordering::Relaxed);
        let host = host.to_ascii_lowercase();
        // Concurrent first sightings may overshoot the limit by a few entries
        let key = if self.domains_blocked.contains_key(&host) || self.domains_blocked.len() < self.host_limit {
            host
        } else {
            OTHER_HOSTS.to_string()
        };
        *self.domains_blocked.entry(key).or_insert(0) += 1;
        *self.request_types.entry(kind).or_insert(0) += 1;
    }

    /// Record an allowed request
    pub fn record_allowed_request(&self, kind: ResourceKind) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.allowed.fetch_add(1, Ordering::Relaxed);
        *self.request_types.entry(kind).or_insert(0) += 1;
    }

    /// Snapshot of every counter
    pub fn get_stats(&self) -> Stats {
        Stats {
            total_requests: self.total.load(Ordering::Relaxed),
            blocked_requests: self.blocked.load(Ordering::Relaxed),
            allowed_requests: self.allowed.load(Ordering::Relaxed),
            domains_blocked: self
                .domains_blocked
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            request_types: self
                .request_types
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
            since: *self.since.read(),
        }
    }

    /// Snapshot serialized as pretty-printed JSON
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.get_stats())?)
    }

    /// The `n` most blocked hosts, most blocked first; ties by name
    pub fn top_blocked_domains(&self, n: usize) -> SmallVec<[(String, u64); TOP_INLINE]> {
        let mut hosts: SmallVec<[(String, u64); TOP_INLINE]> = self
            .domains_blocked
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        hosts.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hosts.truncate(n);
        hosts
    }

    /// Zero every counter and restart the collection window
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.domains_blocked.clear();
        self.request_types.clear();
        *self.since.write() = Utc::now();
    }
}
