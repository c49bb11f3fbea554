//! Request interception for netsieve
//!
//! Glue between a browser's resource-request hook and the [`FilterEngine`]:
//! the global on/off switch, the per-site whitelist, the blocked response
//! and the counters shown to the user.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{BlockingConfig, WhitelistEntry};
use crate::engine::FilterEngine;
use crate::error::{ConfigError, Result, SieveError};
use crate::matcher::{BucketMatcher, MatchContext, RequestMatcher};
use crate::stats::StatsCollector;
use crate::utils::{extract_host, is_subdomain_of, is_valid_domain, strip_tracking_params, truncate};

/// Reason phrase of the synthesized blocked response
pub const BLOCKED_REASON: &str = "Blocked";

/// Sites on which nothing is blocked
#[derive(Debug, Default)]
pub struct DomainWhitelist {
    entries: RwLock<Vec<WhitelistEntry>>,
}

impl DomainWhitelist {
    /// Empty whitelist
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitelist seeded from configuration; invalid domains are dropped
    pub fn from_entries(entries: &[WhitelistEntry]) -> Self {
        let whitelist = Self::new();
        for entry in entries {
            match whitelist.add(&entry.domain) {
                Ok(_) => {
                    whitelist.set_enabled(&entry.domain, entry.enabled);
                }
                Err(e) => log::warn!("Ignoring whitelist entry: {}", e),
            }
        }
        whitelist
    }

    /// Add an enabled entry; returns false if the domain was already present
    pub fn add(&self, domain: &str) -> Result<bool> {
        let domain = normalize(domain);
        if !is_valid_domain(&domain) {
            return Err(SieveError::Config(ConfigError::InvalidValue {
                key: "whitelist".to_string(),
                value: domain,
            }));
        }

        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.domain == domain) {
            return Ok(false);
        }
        info!("Whitelisted {}", domain);
        entries.push(WhitelistEntry::new(domain));
        Ok(true)
    }

    /// Remove an entry; returns whether it existed
    pub fn remove(&self, domain: &str) -> bool {
        let domain = normalize(domain);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.domain != domain);
        entries.len() != before
    }

    /// Enable or disable an entry; returns whether it exists
    pub fn set_enabled(&self, domain: &str, enabled: bool) -> bool {
        let domain = normalize(domain);
        match self.entries.write().iter_mut().find(|entry| entry.domain == domain) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Whether `host` or one of its parent domains has an enabled entry
    pub fn is_whitelisted(&self, host: &str) -> bool {
        let host = normalize(host);
        if host.is_empty() {
            return false;
        }
        self.entries
            .read()
            .iter()
            .any(|entry| entry.enabled && is_subdomain_of(&host, &entry.domain))
    }

    /// Copy of every entry, in insertion order
    pub fn entries(&self) -> Vec<WhitelistEntry> {
        self.entries.read().clone()
    }

    /// Number of entries, enabled or not
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn normalize(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// What the browser should do with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptOutcome {
    /// Let the request through untouched
    Allow,
    /// Answer with an empty response carrying `status`
    Block {
        /// HTTP status code
        status: u16,
    },
}

impl InterceptOutcome {
    /// True for [`InterceptOutcome::Block`]
    pub fn is_blocked(&self) -> bool {
        matches!(self, InterceptOutcome::Block { .. })
    }
}

/// Per-browser request hook
pub struct RequestInterceptor<M = BucketMatcher> {
    engine: Arc<FilterEngine<M>>,
    whitelist: Arc<DomainWhitelist>,
    stats: Arc<StatsCollector>,
    enabled: AtomicBool,
    strip_tracking_params: AtomicBool,
    blocked_status: u16,
    blocked_count: AtomicU64,
}

impl<M: RequestMatcher> RequestInterceptor<M> {
    /// Create an interceptor sharing `engine`, `whitelist` and `stats`
    pub fn new(
        engine: Arc<FilterEngine<M>>,
        whitelist: Arc<DomainWhitelist>,
        stats: Arc<StatsCollector>,
        config: &BlockingConfig,
    ) -> Self {
        Self {
            engine,
            whitelist,
            stats,
            enabled: AtomicBool::new(config.enabled),
            strip_tracking_params: AtomicBool::new(config.strip_tracking_params),
            blocked_status: config.blocked_status,
            blocked_count: AtomicU64::new(0),
        }
    }

    /// Decide a resource request.
    ///
    /// Order: global switch, whitelist (by page host), then the engine.
    pub fn on_request(&self, ctx: &MatchContext<'_>) -> InterceptOutcome {
        if !self.is_enabled() {
            return InterceptOutcome::Allow;
        }

        if let Some(page_host) = ctx.page_host() {
            if self.whitelist.is_whitelisted(&page_host) {
                debug!("Whitelisted page {}: allowing {}", page_host, truncate(ctx.request_url, 120));
                self.stats.record_allowed_request(ctx.resource_kind);
                return InterceptOutcome::Allow;
            }
        }

        if self.engine.should_block(ctx) {
            self.blocked_count.fetch_add(1, Ordering::Relaxed);
            let host = extract_host(ctx.request_url).unwrap_or_default();
            self.stats.record_blocked_request(&host, ctx.resource_kind);
            debug!("Blocked {}: {}", ctx.resource_kind, truncate(ctx.request_url, 120));
            InterceptOutcome::Block {
                status: self.blocked_status,
            }
        } else {
            self.stats.record_allowed_request(ctx.resource_kind);
            InterceptOutcome::Allow
        }
    }

    /// URL to actually navigate to; tracking parameters removed when enabled
    pub fn prepare_navigation(&self, url: &str) -> String {
        if !self.strip_tracking_params.load(Ordering::Relaxed) {
            return url.to_string();
        }
        match strip_tracking_params(url) {
            Ok(stripped) => stripped,
            Err(e) => {
                debug!("Leaving navigation URL untouched ({}): {}", e, truncate(url, 120));
                url.to_string()
            }
        }
    }

    /// Turn blocking on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!("Request blocking {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Whether blocking is on
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn tracking-parameter stripping on or off
    pub fn set_strip_tracking_params(&self, enabled: bool) {
        self.strip_tracking_params.store(enabled, Ordering::Relaxed);
    }

    /// Requests blocked since the last reset
    pub fn blocked_count(&self) -> u64 {
        self.blocked_count.load(Ordering::Relaxed)
    }

    /// Restart the blocked counter, e.g. on navigation
    pub fn reset_blocked_count(&self) {
        self.blocked_count.store(0, Ordering::Relaxed);
    }

    /// Status code used for blocked responses
    pub fn blocked_status(&self) -> u16 {
        self.blocked_status
    }

    /// Shared filter engine
    pub fn engine(&self) -> &Arc<FilterEngine<M>> {
        &self.engine
    }

    /// Shared whitelist
    pub fn whitelist(&self) -> &Arc<DomainWhitelist> {
        &self.whitelist
    }

    /// Shared statistics
    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }
}
