//! Configuration management for netsieve
//!
//! Settings are read from a TOML file. Every section has defaults, so a
//! partial file (or none at all) yields a working configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::{ConfigError, Result, SieveError};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "netsieve.toml";

/// Default filter lists directory
pub const DEFAULT_FILTERS_DIR: &str = "filters";

/// Default bundled filter list, relative to the filters directory
pub const DEFAULT_FILTER_LIST: &str = "default_filters.txt";

/// Status code sent for blocked requests
pub const DEFAULT_BLOCKED_STATUS: u16 = 403;

/// Main configuration structure for netsieve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveConfig {
    /// Filter list locations
    pub filters: FilterConfig,

    /// Decision cache sizing
    pub cache: CacheConfig,

    /// Blocking behavior
    pub blocking: BlockingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Filter list locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Directory holding local and downloaded lists
    pub filters_dir: PathBuf,

    /// Bundled list file name inside `filters_dir`
    pub default_list: String,

    /// Additional list files, loaded after the default list
    pub custom_lists: Vec<PathBuf>,

    /// Lists that can be downloaded into `filters_dir`
    pub remote_lists: Vec<RemoteListConfig>,
}

/// A downloadable filter list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteListConfig {
    /// List name; also the stem of the downloaded file
    pub name: String,

    /// Download location
    pub url: Url,

    /// Enable/disable this list
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Decision cache sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached verdicts
    pub capacity: usize,
}

/// Blocking behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    /// Master switch; when off every request is allowed
    pub enabled: bool,

    /// HTTP status of the synthesized blocked response
    pub blocked_status: u16,

    /// Remove tracking query parameters from navigations
    pub strip_tracking_params: bool,

    /// Sites on which nothing is blocked
    pub whitelist: Vec<WhitelistEntry>,
}

/// A whitelisted site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Domain; sub-domains are included
    pub domain: String,

    /// Disabled entries are kept but ignored
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,

    /// Enable console logging
    pub console: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filters_dir: PathBuf::from(DEFAULT_FILTERS_DIR),
            default_list: DEFAULT_FILTER_LIST.to_string(),
            custom_lists: Vec::new(),
            remote_lists: Vec::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_status: DEFAULT_BLOCKED_STATUS,
            strip_tracking_params: true,
            whitelist: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
        }
    }
}

impl WhitelistEntry {
    /// Enabled entry for `domain`
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            enabled: true,
        }
    }
}

impl FilterConfig {
    /// Path of the bundled default list
    pub fn default_list_path(&self) -> PathBuf {
        self.filters_dir.join(&self.default_list)
    }
}

impl SieveConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SieveError::Config(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            SieveError::Config(ConfigError::Unreadable {
                path: path.to_string_lossy().to_string(),
                reason: e.to_string(),
            })
        })?;

        let config: SieveConfig = toml::from_str(&content).map_err(|e| {
            SieveError::Config(ConfigError::InvalidFormat {
                details: e.to_string(),
            })
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, or defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load_from_file(path) {
            Err(SieveError::Config(ConfigError::FileNotFound { .. })) => Ok(Self::default()),
            other => other,
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity", "0"));
        }

        if !(100..=599).contains(&self.blocking.blocked_status) {
            return Err(invalid("blocking.blocked_status", self.blocking.blocked_status));
        }

        if self.filters.default_list.trim().is_empty() {
            return Err(invalid("filters.default_list", "\"\""));
        }

        if let Some(entry) = self
            .blocking
            .whitelist
            .iter()
            .find(|entry| !crate::utils::is_valid_domain(entry.domain.trim()))
        {
            return Err(invalid("blocking.whitelist", &entry.domain));
        }

        if let Some(remote) = self
            .filters
            .remote_lists
            .iter()
            .find(|remote| !matches!(remote.url.scheme(), "http" | "https"))
        {
            return Err(invalid("filters.remote_lists", remote.url.as_str()));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(invalid("logging.level", &self.logging.level)),
        }

        Ok(())
    }

    /// Create default configuration file
    pub fn create_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
        Self::default().save_to_file(path)
    }

    /// Get the effective filters directory (create if it doesn't exist)
    pub fn ensure_filters_dir(&self) -> Result<&Path> {
        if !self.filters.filters_dir.exists() {
            fs::create_dir_all(&self.filters.filters_dir)?;
        }
        Ok(&self.filters.filters_dir)
    }
}

fn invalid(key: &str, value: impl ToString) -> SieveError {
    SieveError::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_creation() {
        let config = SieveConfig::default();

        assert_eq!(config.cache.capacity, 10_000);
        assert!(config.blocking.enabled);
        assert_eq!(config.blocking.blocked_status, 403);
        assert!(config.blocking.strip_tracking_params);
        assert_eq!(config.filters.default_list_path(), PathBuf::from("filters/default_filters.txt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SieveConfig::default();
        assert!(config.validate().is_ok());

        config.cache.capacity = 0;
        assert!(config.validate().is_err());

        config.cache.capacity = 10;
        config.blocking.blocked_status = 42;
        assert!(config.validate().is_err());

        config.blocking.blocked_status = 204;
        config.blocking.whitelist.push(WhitelistEntry::new("not a domain"));
        assert!(config.validate().is_err());

        config.blocking.whitelist.clear();
        config.logging.level = "invalid".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            SieveError::Config(ConfigError::InvalidValue { ref key, .. }) if key == "logging.level"
        ));
    }

    #[test]
    fn test_remote_list_scheme_validation() {
        let mut config = SieveConfig::default();
        config.filters.remote_lists.push(RemoteListConfig {
            name: "local".to_string(),
            url: Url::parse("file:///etc/hosts").unwrap(),
            enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/netsieve.toml");

        let mut original = SieveConfig::default();
        original.cache.capacity = 500;
        original.filters.custom_lists.push(PathBuf::from("/tmp/mine.txt"));
        original.filters.remote_lists.push(RemoteListConfig {
            name: "easylist".to_string(),
            url: Url::parse("https://easylist.to/easylist/easylist.txt").unwrap(),
            enabled: true,
        });
        original.blocking.whitelist.push(WhitelistEntry {
            domain: "example.org".to_string(),
            enabled: false,
        });
        original.save_to_file(&config_path).unwrap();

        let loaded = SieveConfig::load_from_file(&config_path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("netsieve.toml");
        fs::write(
            &config_path,
            "[blocking]\nblocked_status = 451\n\n[[blocking.whitelist]]\ndomain = \"news.site\"\n",
        )
        .unwrap();

        let config = SieveConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.blocking.blocked_status, 451);
        assert!(config.blocking.enabled);
        assert_eq!(config.blocking.whitelist, vec![WhitelistEntry::new("news.site")]);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_config_file_not_found() {
        let result = SieveConfig::load_from_file("/nonexistent/path/config.toml");

        if let Err(SieveError::Config(ConfigError::FileNotFound { path })) = result {
            assert!(path.contains("nonexistent"));
        } else {
            panic!("Expected FileNotFound error");
        }

        let fallback = SieveConfig::load_or_default("/nonexistent/path/config.toml").unwrap();
        assert_eq!(fallback, SieveConfig::default());
    }

    #[test]
    fn test_invalid_config_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid_config.toml");
        fs::write(&config_path, "invalid toml content [[[").unwrap();

        let result = SieveConfig::load_from_file(&config_path);
        assert!(matches!(result, Err(SieveError::Config(ConfigError::InvalidFormat { .. }))));
    }

    #[test]
    fn test_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = SieveConfig::default();
        config.filters.filters_dir = temp_dir.path().join("netsieve/filters");

        assert!(!config.filters.filters_dir.exists());
        let filters_dir = config.ensure_filters_dir().unwrap();
        assert!(filters_dir.exists());
    }

    #[test]
    fn test_logging_levels() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            let config = SieveConfig {
                logging: LoggingConfig {
                    level: level.to_string(),
                    console: false,
                },
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }
}
