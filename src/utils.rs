//! Utility functions for netsieve
//!
//! Host and URL helpers shared by the matcher, the whitelist and the
//! interceptor, plus resource-kind inference and a small timing helper.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::{generic_error, Result};
use crate::matcher::ResourceKind;

/// Query parameters removed by [`strip_tracking_params`]
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "msclkid",
    "_ga",
    "mc_eid",
    "mc_cid",
    "igshid",
];

/// Extract the lowercased host from an absolute URL
pub fn extract_host(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .host_str()
        .map(|host| host.to_ascii_lowercase())
        .ok_or_else(|| generic_error(format!("No host found in URL: {}", url)))
}

/// Check if `host` equals `parent` or is a dot-boundary sub-domain of it.
///
/// Both sides are expected to be lowercased already.
pub fn is_subdomain_of(host: &str, parent: &str) -> bool {
    if host == parent {
        return true;
    }
    host.len() > parent.len()
        && host.ends_with(parent)
        && host.as_bytes()[host.len() - parent.len() - 1] == b'.'
}

/// Iterate `host` followed by each of its parent domains.
///
/// `a.b.example.com` yields `a.b.example.com`, `b.example.com`,
/// `example.com`, `com`.
pub fn domain_suffixes(host: &str) -> impl Iterator<Item = &str> {
    std::iter::once(host).chain(
        host.match_indices('.')
            .map(move |(i, _)| &host[i + 1..])
            .filter(|suffix| !suffix.is_empty()),
    )
}

/// Split a URL into the segments used by exact-token rules
pub fn url_segments(url: &str) -> impl Iterator<Item = &str> {
    url.split(|c| matches!(c, '/' | '?' | '&' | '='))
        .filter(|segment| !segment.is_empty())
}

/// ABP separator: anything but a letter, digit, `_`, `-`, `.` or `%`
pub fn is_separator(c: char) -> bool {
    !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '%'))
}

/// Validate domain name format
pub fn is_valid_domain(domain: &str) -> bool {
    static DOMAIN_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-_]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-_]{0,61}[a-zA-Z0-9])?)*$")
            .expect("static domain regex")
    });

    !domain.is_empty() && domain.len() <= 253 && DOMAIN_REGEX.is_match(domain)
}

/// Infer the resource kind of a request from its content type or URL.
///
/// The content type wins when it is present and recognised; otherwise the
/// file extension of the last path segment decides.
pub fn infer_resource_kind(url: &str, content_type: Option<&str>) -> ResourceKind {
    if let Some(kind) = content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .and_then(|mime| kind_from_mime(&mime))
    {
        return kind;
    }

    let Ok(parsed) = Url::parse(url) else {
        return ResourceKind::Other;
    };
    if matches!(parsed.scheme(), "ws" | "wss") {
        return ResourceKind::WebSocket;
    }
    let extension = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("css") => ResourceKind::Stylesheet,
        Some("js" | "mjs") => ResourceKind::Script,
        Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "ico" | "avif") => ResourceKind::Image,
        Some("mp4" | "webm" | "mov" | "mp3" | "wav" | "ogg" | "m3u8") => ResourceKind::Media,
        Some("woff" | "woff2" | "ttf" | "otf" | "eot") => ResourceKind::Font,
        Some("html" | "htm") => ResourceKind::Document,
        Some("json" | "xml") => ResourceKind::XmlHttpRequest,
        _ => ResourceKind::Other,
    }
}

fn kind_from_mime(mime: &mime::Mime) -> Option<ResourceKind> {
    let (top, sub) = (mime.type_(), mime.subtype());

    if top == mime::IMAGE {
        Some(ResourceKind::Image)
    } else if top == mime::VIDEO || top == mime::AUDIO {
        Some(ResourceKind::Media)
    } else if top == mime::FONT {
        Some(ResourceKind::Font)
    } else if sub == mime::CSS {
        Some(ResourceKind::Stylesheet)
    } else if sub == mime::HTML {
        Some(ResourceKind::Document)
    } else if sub == mime::JAVASCRIPT {
        Some(ResourceKind::Script)
    } else if sub == mime::JSON || sub == mime::XML {
        Some(ResourceKind::XmlHttpRequest)
    } else {
        None
    }
}

/// Remove common tracking parameters from a URL's query string.
///
/// The fragment and all other parameters are kept in their original order.
pub fn strip_tracking_params(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url)?;
    if parsed.query().is_none() {
        return Ok(parsed.into());
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(parsed.into())
}

/// Truncate string to specified length with ellipsis
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Performance measurement utilities
pub struct PerfTimer {
    start: Instant,
    name: &'static str,
}

impl PerfTimer {
    /// Start a new performance timer
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Get elapsed time without stopping the timer
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        log::debug!("Timer '{}' elapsed: {:?}", self.name, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://Example.com/path").unwrap(), "example.com");
        assert_eq!(extract_host("http://sub.example.com").unwrap(), "sub.example.com");
        assert!(extract_host("not a url").is_err());
        assert!(extract_host("data:text/plain,hello").is_err());
    }

    #[test]
    fn test_is_subdomain_of() {
        assert!(is_subdomain_of("sub.example.com", "example.com"));
        assert!(is_subdomain_of("example.com", "example.com"));
        assert!(!is_subdomain_of("example.com", "sub.example.com"));
        assert!(!is_subdomain_of("notexample.com", "example.com"));
    }

    #[test]
    fn test_domain_suffixes() {
        let suffixes: Vec<_> = domain_suffixes("x.ads.example.com").collect();
        assert_eq!(suffixes, vec!["x.ads.example.com", "ads.example.com", "example.com", "com"]);

        let single: Vec<_> = domain_suffixes("localhost").collect();
        assert_eq!(single, vec!["localhost"]);
    }

    #[test]
    fn test_url_segments() {
        let segments: Vec<_> = url_segments("https://a.com/x/banner?id=7&ad=1").collect();
        assert_eq!(segments, vec!["https:", "a.com", "x", "banner", "id", "7", "ad", "1"]);
    }

    #[test]
    fn test_is_separator() {
        assert!(is_separator('/'));
        assert!(is_separator('?'));
        assert!(is_separator(':'));
        assert!(!is_separator('a'));
        assert!(!is_separator('-'));
        assert!(!is_separator('%'));
    }

    #[test]
    fn test_infer_resource_kind() {
        assert_eq!(infer_resource_kind("https://example.com/style.css", None), ResourceKind::Stylesheet);
        assert_eq!(infer_resource_kind("https://example.com/script.js", None), ResourceKind::Script);
        assert_eq!(infer_resource_kind("https://example.com/image.PNG", None), ResourceKind::Image);
        assert_eq!(infer_resource_kind("wss://example.com/socket", None), ResourceKind::WebSocket);
        assert_eq!(
            infer_resource_kind("https://example.com/api", Some("application/json; charset=utf-8")),
            ResourceKind::XmlHttpRequest
        );
        assert_eq!(
            infer_resource_kind("https://example.com/x.js", Some("image/gif")),
            ResourceKind::Image
        );
        assert_eq!(infer_resource_kind("not a url", None), ResourceKind::Other);
    }

    #[test]
    fn test_strip_tracking_params() {
        assert_eq!(
            strip_tracking_params("https://example.com/page?id=5&utm_source=news&fbclid=abc").unwrap(),
            "https://example.com/page?id=5"
        );
        assert_eq!(
            strip_tracking_params("https://example.com/page?utm_medium=x").unwrap(),
            "https://example.com/page"
        );
        assert_eq!(
            strip_tracking_params("https://example.com/page").unwrap(),
            "https://example.com/page"
        );
        assert!(strip_tracking_params("not a url").is_err());
    }

    #[test]
    fn test_validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("ads.example-cdn.co.uk"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("bad domain.com"));
        assert!(!is_valid_domain("-leading.com"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("https://example.com/very/long", 10), "https:/...");
    }
}
