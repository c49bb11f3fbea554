//! Error handling for netsieve
//!
//! Load-time problems never escape the filter engine: unreadable sources are
//! logged and skipped, unparseable lines become [`ParseSkipped`] counts. The
//! error types here cover the outer surfaces (configuration, list management,
//! file I/O) where a caller does want a `Result`.

use std::fmt;
use thiserror::Error;

/// Main error type for netsieve operations
#[derive(Error, Debug)]
pub enum SieveError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filter list errors
    #[error("Filter list error: {0}")]
    Filter(#[from] FilterError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Regex compilation errors
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Generic errors with context
    #[error("Generic error: {message}")]
    Generic {
        /// Error description
        message: String,
    },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {value}")]
    InvalidValue {
        /// Dotted configuration key
        key: String,
        /// Offending value
        value: String,
    },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path that was looked up
        path: String,
    },

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}: {reason}")]
    Unreadable {
        /// Path that was read
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// Invalid configuration file format
    #[error("Invalid configuration file format: {details}")]
    InvalidFormat {
        /// Parser message
        details: String,
    },
}

/// Filter list source errors
#[derive(Error, Debug)]
pub enum FilterError {
    /// A filter list source could not be read
    #[error("Failed to read filter list '{source_id}': {reason}")]
    SourceUnreadable {
        /// Source identifier (usually a path)
        source_id: String,
        /// Underlying cause
        reason: String,
    },

    /// Filter list download failed
    #[error("Failed to download filter list '{name}' from '{url}': {reason}")]
    DownloadFailed {
        /// List name
        name: String,
        /// Remote location
        url: String,
        /// Underlying cause
        reason: String,
    },

    /// Filter list not registered with the manager
    #[error("Filter list not found: {name}")]
    ListNotFound {
        /// List name
        name: String,
    },

    /// Filter update failed
    #[error("Failed to update filters: {reason}")]
    UpdateFailed {
        /// Underlying cause
        reason: String,
    },
}

/// Why a filter line was not turned into a rule.
///
/// Skips are counted per load and reported through
/// [`ParseReport`](crate::store::ParseReport); they are never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSkipped {
    /// Nothing left after stripping `@@`, anchors, `^` and `$` options
    Empty,
    /// `@@@@...`
    NestedException,
    /// The translated pattern failed to compile
    InvalidRegex,
}

impl fmt::Display for ParseSkipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ParseSkipped::Empty => "empty pattern",
            ParseSkipped::NestedException => "nested exception",
            ParseSkipped::InvalidRegex => "regex failed to compile",
        };
        f.write_str(reason)
    }
}

/// Result type alias for netsieve operations
pub type Result<T> = std::result::Result<T, SieveError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<SieveError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let original_error = e.into();
            SieveError::Generic {
                message: format!("{}: {}", f(), original_error),
            }
        })
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.with_context(|| msg.to_string())
    }
}

/// Helper function to create a generic error
pub fn generic_error(message: impl Into<String>) -> SieveError {
    SieveError::Generic {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_error = ConfigError::InvalidValue {
            key: "cache.capacity".to_string(),
            value: "0".to_string(),
        };
        let err = SieveError::Config(config_error);

        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("cache.capacity"));
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "test"));

        let with_context = result.context("Failed to read filter list");
        assert!(with_context.is_err());
        assert!(with_context
            .unwrap_err()
            .to_string()
            .contains("Failed to read filter list"));
    }

    #[test]
    fn test_parse_skipped_display() {
        assert_eq!(ParseSkipped::InvalidRegex.to_string(), "regex failed to compile");
        assert_eq!(ParseSkipped::Empty.to_string(), "empty pattern");
    }
}
