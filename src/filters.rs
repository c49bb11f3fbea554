//! Filter list sources and management for netsieve
//!
//! A [`ListSource`] turns a list identifier into raw lines. The
//! [`FilterListManager`] knows which lists are configured, in which order
//! they are loaded, and keeps per-list metadata. Remote lists are fetched
//! into the filters directory when the `network` feature is enabled.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::FilterConfig;
use crate::engine::FilterEngine;
use crate::error::{ErrorContext, FilterError, Result};
use crate::matcher::RequestMatcher;
use crate::rules::is_rule_line;

/// Supplier of raw filter-list lines
pub trait ListSource: Send + Sync {
    /// Read every line of the list identified by `id`
    fn read_lines(&self, id: &str) -> Result<Vec<String>>;
}

/// Reads lists from the filesystem; the identifier is a path
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl ListSource for FileSource {
    fn read_lines(&self, id: &str) -> Result<Vec<String>> {
        let content = fs::read_to_string(id).map_err(|e| FilterError::SourceUnreadable {
            source_id: id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(split_lines(&content))
    }
}

/// Named in-memory lists
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    lists: HashMap<String, Vec<String>>,
}

impl MemorySource {
    /// Source with no lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a list built from newline-separated `content`
    pub fn with_list(mut self, id: impl Into<String>, content: &str) -> Self {
        self.insert(id, content);
        self
    }

    /// Add (or replace) a list built from newline-separated `content`
    pub fn insert(&mut self, id: impl Into<String>, content: &str) {
        self.lists.insert(id.into(), split_lines(content));
    }
}

impl ListSource for MemorySource {
    fn read_lines(&self, id: &str) -> Result<Vec<String>> {
        self.lists.get(id).cloned().ok_or_else(|| {
            FilterError::SourceUnreadable {
                source_id: id.to_string(),
                reason: "no such in-memory list".to_string(),
            }
            .into()
        })
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content.lines().map(str::to_owned).collect()
}

/// Where a configured list comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrigin {
    /// The bundled default list
    Bundled,
    /// A user-supplied local file
    Custom,
    /// Downloaded from a URL
    Remote {
        /// Download location
        url: Url,
    },
}

/// Filter list metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterListMetadata {
    /// Display name
    pub name: String,
    /// Local file the list is read from
    pub location: PathBuf,
    /// Where the list comes from
    pub origin: ListOrigin,
    /// Last successful load or download
    pub last_updated: Option<DateTime<Utc>>,
    /// Rule lines (comments and blanks excluded) seen on the last load
    pub rule_count: usize,
    /// Disabled lists are neither loaded nor downloaded
    pub enabled: bool,
}

impl FilterListMetadata {
    fn new(name: String, location: PathBuf, origin: ListOrigin, enabled: bool) -> Self {
        Self {
            name,
            location,
            origin,
            last_updated: None,
            rule_count: 0,
            enabled,
        }
    }

    /// Location as a [`ListSource`] identifier
    pub fn source_id(&self) -> String {
        self.location.to_string_lossy().into_owned()
    }
}

/// Filter list manager
#[derive(Debug, Clone)]
pub struct FilterListManager {
    filters_dir: PathBuf,
    lists: Vec<FilterListMetadata>,
}

impl FilterListManager {
    /// Register the configured lists: bundled default, custom files, then remote lists
    pub fn new(config: &FilterConfig) -> Self {
        let mut lists = vec![FilterListMetadata::new(
            "default".to_string(),
            config.default_list_path(),
            ListOrigin::Bundled,
            true,
        )];

        for path in &config.custom_lists {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            lists.push(FilterListMetadata::new(name, path.clone(), ListOrigin::Custom, true));
        }

        for remote in &config.remote_lists {
            lists.push(FilterListMetadata::new(
                remote.name.clone(),
                config.filters_dir.join(format!("{}.txt", remote.name)),
                ListOrigin::Remote {
                    url: remote.url.clone(),
                },
                remote.enabled,
            ));
        }

        debug!("Registered {} filter lists", lists.len());
        Self {
            filters_dir: config.filters_dir.clone(),
            lists,
        }
    }

    /// Metadata for every registered list, in load order
    pub fn lists(&self) -> &[FilterListMetadata] {
        &self.lists
    }

    /// Metadata for a single list
    pub fn get(&self, name: &str) -> Option<&FilterListMetadata> {
        self.lists.iter().find(|list| list.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut FilterListMetadata> {
        self.lists
            .iter_mut()
            .find(|list| list.name == name)
            .ok_or_else(|| FilterError::ListNotFound { name: name.to_string() }.into())
    }

    /// Enable or disable a list for subsequent loads
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        self.get_mut(name)?.enabled = enabled;
        Ok(())
    }

    /// Source identifiers of the lists to load, in order.
    ///
    /// Remote lists that were never downloaded are left out.
    pub fn sources(&self) -> Vec<String> {
        self.lists
            .iter()
            .filter(|list| list.enabled)
            .filter(|list| !matches!(list.origin, ListOrigin::Remote { .. }) || list.location.exists())
            .map(FilterListMetadata::source_id)
            .collect()
    }

    /// Read every enabled list through `source`, record its metadata and
    /// install the combined rules into `engine`; returns the engine's rule count.
    pub fn load_into<M: RequestMatcher>(&mut self, engine: &FilterEngine<M>, source: &dyn ListSource) -> usize {
        let wanted = self.sources();
        let mut lines = Vec::new();

        for list in self.lists.iter_mut().filter(|list| list.enabled) {
            let id = list.source_id();
            if !wanted.contains(&id) {
                continue;
            }
            match source.read_lines(&id) {
                Ok(list_lines) => {
                    list.rule_count = list_lines.iter().filter(|line| is_rule_line(line)).count();
                    list.last_updated = Some(Utc::now());
                    debug!("Filter list '{}' has {} rule lines", list.name, list.rule_count);
                    lines.extend(list_lines);
                }
                Err(e) => {
                    list.rule_count = 0;
                    warn!("Skipping filter list '{}': {}", list.name, e);
                }
            }
        }

        engine.load_lines(&lines)
    }

    /// Directory downloaded lists are written to
    pub fn filters_dir(&self) -> &Path {
        &self.filters_dir
    }

    /// Download one remote list into the filters directory; returns its rule line count
    pub async fn update_list(&mut self, name: &str) -> Result<usize> {
        let list = self.get_mut(name)?;
        let url = match &list.origin {
            ListOrigin::Remote { url } => url.clone(),
            _ => {
                return Err(FilterError::UpdateFailed {
                    reason: format!("'{}' is not a remote list", name),
                }
                .into())
            }
        };

        if !list.enabled {
            debug!("Skipping disabled filter list: {}", name);
            return Ok(list.rule_count);
        }

        info!("Updating filter list: {}", name);
        let content = download_filter_list(name, &url).await?;
        let rule_count = content.lines().filter(|line| is_rule_line(line)).count();

        let location = list.location.clone();
        if let Some(parent) = location.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&location, content.as_bytes())
            .await
            .with_context(|| format!("writing {}", location.display()))?;

        let list = self.get_mut(name)?;
        list.rule_count = rule_count;
        list.last_updated = Some(Utc::now());

        info!("Updated filter list '{}' with {} rule lines", name, rule_count);
        Ok(rule_count)
    }

    /// Download every enabled remote list; returns how many succeeded
    pub async fn update_all(&mut self) -> usize {
        let names: Vec<String> = self
            .lists
            .iter()
            .filter(|list| list.enabled && matches!(list.origin, ListOrigin::Remote { .. }))
            .map(|list| list.name.clone())
            .collect();

        let mut updated = 0;
        for name in names {
            match self.update_list(&name).await {
                Ok(_) => updated += 1,
                Err(e) => warn!("Failed to update filter list '{}': {}", name, e),
            }
        }
        updated
    }
}

/// Download filter list content
#[cfg(feature = "network")]
async fn download_filter_list(name: &str, url: &Url) -> Result<String> {
    let failed = |reason: String| FilterError::DownloadFailed {
        name: name.to_string(),
        url: url.to_string(),
        reason,
    };

    let response = reqwest::get(url.as_str())
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| failed(e.to_string()))?;

    let content = response.text().await.map_err(|e| failed(e.to_string()))?;
    Ok(content)
}

/// Download filter list content (stub when network feature is disabled)
#[cfg(not(feature = "network"))]
async fn download_filter_list(name: &str, url: &Url) -> Result<String> {
    Err(FilterError::DownloadFailed {
        name: name.to_string(),
        url: url.to_string(),
        reason: "Network feature disabled".to_string(),
    }
    .into())
}
