//! Request matching against a [`RuleStore`]
//!
//! Buckets are consulted cheapest and most authoritative first:
//! exceptions, domain anchors, exact segments, substrings, then regexes.
//! Malformed request URLs are never blocked.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::{Position, Url};

use crate::rules::{Bucket, DomainRule, Rule};
use crate::store::RuleStore;
use crate::utils::{domain_suffixes, is_separator, is_subdomain_of, url_segments};

/// Kind of resource a request is fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Top-level or frame document
    Document,
    /// JavaScript
    Script,
    /// CSS
    Stylesheet,
    /// Images and icons
    Image,
    /// Web fonts
    Font,
    /// Audio and video
    Media,
    /// XHR / fetch
    XmlHttpRequest,
    /// WebSocket upgrade
    WebSocket,
    /// Anything else
    #[default]
    Other,
}

impl ResourceKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Script => "script",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Image => "image",
            ResourceKind::Font => "font",
            ResourceKind::Media => "media",
            ResourceKind::XmlHttpRequest => "xmlhttprequest",
            ResourceKind::WebSocket => "websocket",
            ResourceKind::Other => "other",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Infallible;

    /// Unknown tags map to [`ResourceKind::Other`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "document" | "main_frame" | "sub_frame" | "subdocument" => ResourceKind::Document,
            "script" => ResourceKind::Script,
            "stylesheet" | "css" => ResourceKind::Stylesheet,
            "image" | "img" | "imageset" => ResourceKind::Image,
            "font" => ResourceKind::Font,
            "media" => ResourceKind::Media,
            "xmlhttprequest" | "xhr" | "fetch" => ResourceKind::XmlHttpRequest,
            "websocket" => ResourceKind::WebSocket,
            _ => ResourceKind::Other,
        };
        Ok(kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request matching input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchContext<'a> {
    /// Absolute URL being requested
    pub request_url: &'a str,
    /// Absolute URL of the top-level page, or empty
    pub document_url: &'a str,
    /// What the request fetches
    pub resource_kind: ResourceKind,
}

impl<'a> MatchContext<'a> {
    /// Context for a request with no document and an unknown kind
    pub fn new(request_url: &'a str) -> Self {
        Self {
            request_url,
            document_url: "",
            resource_kind: ResourceKind::Other,
        }
    }

    /// Set the issuing document's URL
    pub fn with_document(mut self, document_url: &'a str) -> Self {
        self.document_url = document_url;
        self
    }

    /// Set the resource kind
    pub fn with_kind(mut self, resource_kind: ResourceKind) -> Self {
        self.resource_kind = resource_kind;
        self
    }

    /// Host of the page the request belongs to.
    ///
    /// Falls back to the request host when no usable document URL is set.
    pub fn page_host(&self) -> Option<String> {
        let from = |raw: &str| {
            Url::parse(raw)
                .ok()
                .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        };
        if self.document_url.is_empty() {
            from(self.request_url)
        } else {
            from(self.document_url).or_else(|| from(self.request_url))
        }
    }
}

/// A request URL parsed once for every bucket
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    url: String,
    lower: String,
    host: String,
    path_offset: usize,
}

impl NormalizedRequest {
    /// Parse an absolute URL; `None` when it is not one
    pub fn parse(raw: &str) -> Option<Self> {
        let parsed = Url::parse(raw).ok()?;
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let path_offset = parsed[..Position::BeforePath].len();
        let url: String = parsed.into();
        let lower = url.to_ascii_lowercase();

        Some(Self {
            url,
            lower,
            host,
            path_offset,
        })
    }

    /// Serialized URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lowercased serialized URL
    pub fn lower(&self) -> &str {
        &self.lower
    }

    /// Lowercased host, empty for host-less URLs
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Lowercased path, query and fragment
    pub fn path_and_query(&self) -> &str {
        &self.lower[self.path_offset..]
    }
}

impl DomainRule {
    /// Host (and path prefix, if any) match
    pub fn matches(&self, request: &NormalizedRequest) -> bool {
        is_subdomain_of(request.host(), &self.domain) && self.path_matches(request)
    }

    fn path_matches(&self, request: &NormalizedRequest) -> bool {
        let Some(prefix) = &self.path else {
            return true;
        };
        request
            .path_and_query()
            .strip_prefix(prefix.as_str())
            .map_or(false, |tail| tail.chars().next().map_or(true, is_separator))
    }
}

impl Rule {
    /// Whether this rule, on its own, matches the request.
    ///
    /// For an exception this is the inner rule's match.
    pub fn matches(&self, request: &NormalizedRequest) -> bool {
        match self {
            Rule::Domain(rule) => rule.matches(request),
            Rule::Exact(rule) => url_segments(request.lower()).any(|segment| segment == rule.token),
            Rule::Substring(rule) => request.lower().contains(rule.needle.as_str()),
            Rule::Regex(rule) => rule.pattern.is_match(request.url()),
            Rule::Exception(rule) => rule.inner.matches(request),
        }
    }
}

/// Why a request was or was not blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome<'s> {
    /// The request URL is not absolute; allowed
    Malformed,
    /// Nothing matched; allowed
    NoMatch,
    /// An `@@` rule matched; allowed
    Exception(&'s str),
    /// A block rule matched
    Block {
        /// Bucket the rule lives in
        bucket: Bucket,
        /// Rule text
        rule: &'s str,
    },
}

impl MatchOutcome<'_> {
    /// True when the request must be blocked
    pub fn is_block(&self) -> bool {
        matches!(self, MatchOutcome::Block { .. })
    }
}

/// Verdict strategy used by the filter engine
pub trait RequestMatcher: Send + Sync {
    /// Decide a request against `store`; `true` blocks it
    fn evaluate(&self, store: &RuleStore, ctx: &MatchContext<'_>) -> bool;
}

/// Bucket-ordered matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketMatcher;

impl BucketMatcher {
    /// Evaluate and report the deciding rule
    pub fn explain<'s>(&self, store: &'s RuleStore, ctx: &MatchContext<'_>) -> MatchOutcome<'s> {
        let Some(request) = NormalizedRequest::parse(ctx.request_url) else {
            return MatchOutcome::Malformed;
        };

        if let Some(rule) = store.exception_rules().iter().find(|rule| rule.matches(&request)) {
            return MatchOutcome::Exception(rule.text());
        }

        if store.has_domain_rules() && !request.host().is_empty() {
            for suffix in domain_suffixes(request.host()) {
                let hit = store
                    .domain_rules_for(suffix)
                    .and_then(|rules| rules.iter().find(|rule| rule.path_matches(&request)));
                if let Some(rule) = hit {
                    return MatchOutcome::Block {
                        bucket: Bucket::Domain,
                        rule: &rule.text,
                    };
                }
            }
        }

        if let Some(rule) = url_segments(request.lower()).find_map(|segment| store.exact_rule(segment)) {
            return MatchOutcome::Block {
                bucket: Bucket::Exact,
                rule: &rule.text,
            };
        }

        if let Some(rule) = store.first_substring(request.lower()) {
            return MatchOutcome::Block {
                bucket: Bucket::Substring,
                rule: &rule.text,
            };
        }

        if let Some(rule) = store.regex_rules().iter().find(|rule| rule.pattern.is_match(request.url())) {
            return MatchOutcome::Block {
                bucket: Bucket::Regex,
                rule: &rule.text,
            };
        }

        MatchOutcome::NoMatch
    }
}

impl RequestMatcher for BucketMatcher {
    fn evaluate(&self, store: &RuleStore, ctx: &MatchContext<'_>) -> bool {
        self.explain(store, ctx).is_block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lines: &[&str]) -> RuleStore {
        RuleStore::parse(lines)
    }

    fn blocks(store: &RuleStore, url: &str) -> bool {
        BucketMatcher.evaluate(store, &MatchContext::new(url))
    }

    #[test]
    fn test_normalized_request() {
        let request = NormalizedRequest::parse("HTTPS://Ads.Example.COM:8443/Path/X.js?Q=1").unwrap();
        assert_eq!(request.host(), "ads.example.com");
        assert_eq!(request.url(), "https://ads.example.com:8443/Path/X.js?Q=1");
        assert_eq!(request.path_and_query(), "/path/x.js?q=1");
        assert!(NormalizedRequest::parse("not a url").is_none());
    }

    #[test]
    fn test_domain_rules_include_subdomains() {
        let store = store(&["||ads.example.com^"]);
        assert!(blocks(&store, "http://x.ads.example.com/y"));
        assert!(blocks(&store, "http://ads.example.com/y"));
        assert!(!blocks(&store, "http://notads.example.com/y"));
        assert!(!blocks(&store, "http://example.com/ads.example.com"));
    }

    #[test]
    fn test_exception_wins() {
        let store = store(&["||doubleclick.net^", "@@||doubleclick.net/safe^"]);
        assert!(blocks(&store, "https://doubleclick.net/ad.js"));
        assert!(!blocks(&store, "https://doubleclick.net/safe/ok.js"));
        assert!(blocks(&store, "https://doubleclick.net/safety.js"));
    }

    #[test]
    fn test_exception_overrides_every_bucket() {
        let store = store(&["adserver", "/ads.js", "banner*.gif", "@@||good.com^"]);
        assert!(blocks(&store, "https://bad.com/adserver/x"));
        assert!(!blocks(&store, "https://good.com/adserver/x"));
        assert!(!blocks(&store, "https://good.com/scripts/ads.js"));
        assert!(!blocks(&store, "https://cdn.good.com/banner1.gif"));
    }

    #[test]
    fn test_exact_segments() {
        let store = store(&["AdServer"]);
        assert!(blocks(&store, "https://example.com/adserver?x=1"));
        assert!(blocks(&store, "https://example.com/p?ADSERVER=1"));
        assert!(!blocks(&store, "https://example.com/adservers/x"));
    }

    #[test]
    fn test_substring() {
        let store = store(&["/ads.js"]);
        assert!(blocks(&store, "https://cdn.example.com/scripts/ads.js"));
        assert!(!blocks(&store, "https://cdn.example.com/scripts/no-ads.css"));
        assert!(blocks(&store, "https://cdn.example.com/scripts/ADS.JS"));
    }

    #[test]
    fn test_regex() {
        let store = store(&["/banner*/img^", "|https://track.*"]);
        assert!(blocks(&store, "https://x.com/banner-top/img?id=1"));
        assert!(blocks(&store, "https://x.com/BANNER/img"));
        assert!(!blocks(&store, "https://x.com/banner/imgs"));
        assert!(blocks(&store, "https://track.example.com/p"));
        assert!(!blocks(&store, "http://track.example.com/p"));
    }

    #[test]
    fn test_malformed_fails_open() {
        let store = store(&["not", "a", "url", "*"]);
        let outcome = BucketMatcher.explain(&store, &MatchContext::new("not a url"));
        assert_eq!(outcome, MatchOutcome::Malformed);
        assert!(!blocks(&store, ""));
    }

    #[test]
    fn test_explain_reports_rule() {
        let store = store(&["||doubleclick.net^", "@@||doubleclick.net/safe^"]);
        assert_eq!(
            BucketMatcher.explain(&store, &MatchContext::new("https://doubleclick.net/ad.js")),
            MatchOutcome::Block {
                bucket: Bucket::Domain,
                rule: "||doubleclick.net^",
            }
        );
        assert_eq!(
            BucketMatcher.explain(&store, &MatchContext::new("https://doubleclick.net/safe/ok.js")),
            MatchOutcome::Exception("@@||doubleclick.net/safe^")
        );
        assert_eq!(
            BucketMatcher.explain(&store, &MatchContext::new("https://example.org/")),
            MatchOutcome::NoMatch
        );
    }

    #[test]
    fn test_resource_kind_does_not_change_verdict() {
        let store = store(&["/ads.js"]);
        let url = "https://cdn.example.com/ads.js";
        for kind in [ResourceKind::Script, ResourceKind::Image, ResourceKind::Document, ResourceKind::Other] {
            let ctx = MatchContext::new(url).with_document("https://news.example.com/").with_kind(kind);
            assert!(BucketMatcher.evaluate(&store, &ctx));
        }
    }

    #[test]
    fn test_page_host() {
        let ctx = MatchContext::new("https://cdn.example.com/a.js").with_document("https://News.Site.org/page");
        assert_eq!(ctx.page_host().as_deref(), Some("news.site.org"));

        let ctx = MatchContext::new("https://cdn.example.com/a.js");
        assert_eq!(ctx.page_host().as_deref(), Some("cdn.example.com"));

        let ctx = MatchContext::new("https://cdn.example.com/a.js").with_document("garbage");
        assert_eq!(ctx.page_host().as_deref(), Some("cdn.example.com"));
    }

    #[test]
    fn test_resource_kind_parsing() {
        assert_eq!("script".parse::<ResourceKind>().unwrap(), ResourceKind::Script);
        assert_eq!("XHR".parse::<ResourceKind>().unwrap(), ResourceKind::XmlHttpRequest);
        assert_eq!("sub_frame".parse::<ResourceKind>().unwrap(), ResourceKind::Document);
        assert_eq!("weird".parse::<ResourceKind>().unwrap(), ResourceKind::Other);
        assert_eq!(ResourceKind::Stylesheet.to_string(), "stylesheet");
    }
}
