//! # netsieve: request filtering for browser shells
//!
//! Compiles Adblock-Plus style filter lists into a fast, hot-reloadable
//! block/allow matcher and wires it into a browser's resource-request hook.
//!
//! ## Features
//!
//! - **Bucketed matching**: exceptions, domain anchors, exact segments,
//!   substrings and wildcard/regex rules, consulted in that order
//! - **Memoized verdicts**: a bounded per-URL cache in front of the matcher
//! - **Atomic reloads**: new rule sets replace the old one without ever
//!   serving a verdict computed against a replaced set
//! - **Browser glue**: on/off switch, per-site whitelist, blocked response,
//!   counters and tracking-parameter stripping
//! - **C ABI**: an opaque engine handle for non-Rust hosts
//!
//! ## Architecture
//!
//! - [`rules`]: filter line parsing and pattern translation
//! - [`store`]: the immutable, bucketed rule snapshot
//! - [`matcher`]: request normalization and bucket-ordered evaluation
//! - [`cache`]: bounded verdict cache
//! - [`engine`]: the filter engine facade and reload logic
//! - [`filters`]: list sources and filter list management
//! - [`interceptor`]: whitelist and request hook
//! - [`config`]: configuration management and persistence
//! - [`stats`]: request statistics
//! - [`ffi`]: C entry points
//!
//! ## Example
//!
//! ```
//! use netsieve::{FilterEngine, MatchContext};
//!
//! let engine = FilterEngine::default();
//! engine.load_lines(&["||doubleclick.net^", "@@||doubleclick.net/safe^"]);
//!
//! assert!(engine.should_block(&MatchContext::new("https://doubleclick.net/ad.js")));
//! assert!(!engine.should_block(&MatchContext::new("https://doubleclick.net/safe/ok.js")));
//! ```

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true
)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod filters;
pub mod interceptor;
pub mod matcher;
pub mod rules;
pub mod stats;
pub mod store;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

pub use crate::config::SieveConfig;
pub use crate::engine::{EngineDiagnostics, FilterEngine};
pub use crate::error::{ParseSkipped, SieveError};
pub use crate::filters::{FileSource, FilterListManager, ListSource, MemorySource};
pub use crate::interceptor::{DomainWhitelist, InterceptOutcome, RequestInterceptor};
pub use crate::matcher::{BucketMatcher, MatchContext, MatchOutcome, RequestMatcher, ResourceKind};
pub use crate::rules::abp_pattern_to_regex;
pub use crate::stats::{Stats, StatsCollector};
pub use crate::store::{ParseReport, RuleStore};

use crate::config::LoggingConfig;

/// Fully wired filtering stack for one browser profile
pub struct Shield {
    config: SieveConfig,
    engine: Arc<FilterEngine>,
    lists: FilterListManager,
    interceptor: RequestInterceptor,
}

impl Shield {
    /// Build every component from `config` and load the configured lists.
    ///
    /// Missing or unreadable lists are logged and skipped; the shield comes
    /// up with whatever rules could be read.
    pub fn from_config(config: SieveConfig) -> Result<Self> {
        config.validate().context("invalid netsieve configuration")?;
        info!("Initializing netsieve {}", env!("CARGO_PKG_VERSION"));

        let engine = Arc::new(FilterEngine::new(&config.cache));
        let whitelist = Arc::new(DomainWhitelist::from_entries(&config.blocking.whitelist));
        let stats = Arc::new(StatsCollector::new());
        let interceptor = RequestInterceptor::new(Arc::clone(&engine), whitelist, stats, &config.blocking);
        let lists = FilterListManager::new(&config.filters);

        let mut shield = Self {
            config,
            engine,
            lists,
            interceptor,
        };
        shield.reload();
        Ok(shield)
    }

    /// Load configuration from `path` (defaults if absent) and build the shield
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = SieveConfig::load_or_default(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        Self::from_config(config)
    }

    /// Re-read every enabled list and install the result; returns the rule count
    pub fn reload(&mut self) -> usize {
        let count = self.lists.load_into(&self.engine, &FileSource);
        if count == 0 {
            warn!("No filter rules loaded; requests will not be blocked");
        }
        count
    }

    /// Download every enabled remote list, then reload
    pub async fn update_lists(&mut self) -> Result<usize> {
        self.config
            .ensure_filters_dir()
            .context("cannot create filters directory")?;
        let updated = self.lists.update_all().await;
        info!("Downloaded {} remote filter lists", updated);
        Ok(self.reload())
    }

    /// Active configuration
    pub fn config(&self) -> &SieveConfig {
        &self.config
    }

    /// Shared filter engine
    pub fn engine(&self) -> &Arc<FilterEngine> {
        &self.engine
    }

    /// Filter list metadata and management
    pub fn lists(&self) -> &FilterListManager {
        &self.lists
    }

    /// Mutable access to filter list management
    pub fn lists_mut(&mut self) -> &mut FilterListManager {
        &mut self.lists
    }

    /// Browser request hook
    pub fn interceptor(&self) -> &RequestInterceptor {
        &self.interceptor
    }
}

/// Install the global logger according to `config`.
///
/// `RUST_LOG` overrides the configured level. Calling this more than once
/// is harmless; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    if !config.console {
        return;
    }

    let default_level = if cfg!(feature = "debug-logging") {
        "debug"
    } else {
        config.level.as_str()
    };

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .try_init();
}
