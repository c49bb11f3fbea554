//! Filter rule parsing
//!
//! Turns Adblock-Plus style filter lines into typed [`Rule`] values. The
//! grammar is a practical subset:
//!
//! - `! comment` and `[Adblock Plus 2.0]` headers are ignored
//! - `||domain^` anchors a host and all of its sub-domains
//! - `@@` turns any other rule into an exception
//! - `*`, `?`, `[` wildcards and `/raw regex/` become regular expressions
//! - bare tokens without `/` or `.` match a whole URL segment
//! - anything else is a case-insensitive substring
//! - a trailing `$options` block is dropped; the rule applies everywhere
//!
//! Parsing is best effort: a line that cannot be used yields
//! [`LineOutcome::Skipped`] with a reason and never an error.

use regex::{Regex, RegexBuilder};
use url::Host;

use crate::error::ParseSkipped;

/// Compiled regex size ceiling; pathological lines are skipped instead
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Matching strategy a rule is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// `@@` allow rules
    Exception,
    /// `||host^` rules
    Domain,
    /// Whole-segment tokens
    Exact,
    /// Plain substrings
    Substring,
    /// Translated wildcard / raw regex rules
    Regex,
}

/// `||domain^`, optionally followed by a path prefix before the `^`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRule {
    /// Original rule text
    pub text: String,
    /// Lowercased host the rule anchors to
    pub domain: String,
    /// Lowercased path prefix (starting with `/`) for `||host/path^`
    pub path: Option<String>,
}

/// Bare token matched against whole URL segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactRule {
    /// Original rule text
    pub text: String,
    /// Lowercased token
    pub token: String,
}

/// Plain substring rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringRule {
    /// Original rule text
    pub text: String,
    /// Lowercased needle
    pub needle: String,
}

/// Wildcard rule compiled to a regular expression
#[derive(Debug, Clone)]
pub struct RegexRule {
    /// Original rule text
    pub text: String,
    /// Case-insensitive compiled pattern
    pub pattern: Regex,
}

/// `@@` allow rule wrapping one of the block strategies
#[derive(Debug, Clone)]
pub struct ExceptionRule {
    /// Original rule text, including the `@@`
    pub text: String,
    /// Rule deciding whether the exception applies
    pub inner: Box<Rule>,
}

/// A parsed filter rule
#[derive(Debug, Clone)]
pub enum Rule {
    /// Host anchor
    Domain(DomainRule),
    /// Segment token
    Exact(ExactRule),
    /// Substring
    Substring(SubstringRule),
    /// Regular expression
    Regex(RegexRule),
    /// Allow rule
    Exception(ExceptionRule),
}

impl Rule {
    /// The filter line this rule was built from
    pub fn text(&self) -> &str {
        match self {
            Rule::Domain(r) => &r.text,
            Rule::Exact(r) => &r.text,
            Rule::Substring(r) => &r.text,
            Rule::Regex(r) => &r.text,
            Rule::Exception(r) => &r.text,
        }
    }

    /// Bucket the rule is stored in
    pub fn bucket(&self) -> Bucket {
        match self {
            Rule::Domain(_) => Bucket::Domain,
            Rule::Exact(_) => Bucket::Exact,
            Rule::Substring(_) => Bucket::Substring,
            Rule::Regex(_) => Bucket::Regex,
            Rule::Exception(_) => Bucket::Exception,
        }
    }

    /// Whether this is an `@@` rule
    pub fn is_exception(&self) -> bool {
        matches!(self, Rule::Exception(_))
    }
}

/// Result of feeding one line to the parser
#[derive(Debug, Clone)]
pub enum LineOutcome {
    /// Blank line, `!` comment or `[...]` header
    Ignored,
    /// Successfully classified rule
    Parsed(Rule),
    /// Line could not be used
    Skipped(ParseSkipped),
}

/// Whether a raw line carries a rule at all (not blank, comment or header)
pub fn is_rule_line(raw: &str) -> bool {
    let line = raw.trim();
    !(line.is_empty() || line.starts_with('!') || line.starts_with('['))
}

/// Parse a single raw filter-list line
pub fn parse_line(raw: &str) -> LineOutcome {
    if !is_rule_line(raw) {
        return LineOutcome::Ignored;
    }
    let line = raw.trim();

    match classify(line) {
        Ok(rule) => LineOutcome::Parsed(rule),
        Err(reason) => LineOutcome::Skipped(reason),
    }
}

/// Classify a trimmed, non-comment line
pub fn classify(line: &str) -> Result<Rule, ParseSkipped> {
    let Some(rest) = line.strip_prefix("@@") else {
        return classify_block(line);
    };

    if rest.is_empty() {
        return Err(ParseSkipped::Empty);
    }
    if rest.starts_with("@@") {
        return Err(ParseSkipped::NestedException);
    }

    let inner = classify_block(rest)?;
    Ok(Rule::Exception(ExceptionRule {
        text: line.to_string(),
        inner: Box::new(inner),
    }))
}

fn classify_block(line: &str) -> Result<Rule, ParseSkipped> {
    if is_raw_regex(line) {
        return regex_rule(line);
    }

    let pattern = strip_options(line);

    if let Some(anchored) = domain_anchor(pattern) {
        let (host, path) = match anchored.split_once('/') {
            Some((host, path)) => (host, Some(format!("/{}", path.to_ascii_lowercase()))),
            None => (anchored, None),
        };
        if host.is_empty() {
            return Err(ParseSkipped::Empty);
        }
        return Ok(Rule::Domain(DomainRule {
            text: line.to_string(),
            domain: ascii_host(host),
            path,
        }));
    }

    if pattern.contains(&['*', '?', '['][..]) {
        return regex_rule(pattern);
    }

    // `|` anchors and `^` separators carry no meaning outside a regex
    let literal = anchor_body(pattern).replace('^', "");
    if literal.is_empty() {
        return Err(ParseSkipped::Empty);
    }

    if !literal.contains(&['/', '.'][..]) {
        return Ok(Rule::Exact(ExactRule {
            text: line.to_string(),
            token: literal.to_lowercase(),
        }));
    }

    Ok(Rule::Substring(SubstringRule {
        text: line.to_string(),
        needle: literal.to_lowercase(),
    }))
}

/// Text between `||` and the first `^`, if the line is a plain host anchor
fn domain_anchor(pattern: &str) -> Option<&str> {
    let rest = pattern.strip_prefix("||")?;
    let end = rest.find('^')?;
    let anchored = &rest[..end];
    if anchored.contains(&['*', '?', '['][..]) {
        return None;
    }
    Some(anchored)
}

/// Rule hosts compare against `Url::host_str`, which is punycode
fn ascii_host(host: &str) -> String {
    if host.is_ascii() {
        return host.to_ascii_lowercase();
    }
    match Host::parse(host) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => host.to_lowercase(),
    }
}

/// Pattern without a leading `||` / `|` and a trailing `|`
fn anchor_body(pattern: &str) -> &str {
    let body = pattern
        .strip_prefix("||")
        .or_else(|| pattern.strip_prefix('|'))
        .unwrap_or(pattern);
    body.strip_suffix('|').unwrap_or(body)
}

fn regex_rule(pattern: &str) -> Result<Rule, ParseSkipped> {
    if !is_raw_regex(pattern) && anchor_body(pattern).is_empty() {
        return Err(ParseSkipped::Empty);
    }
    let translated = abp_pattern_to_regex(pattern);
    let compiled = RegexBuilder::new(&translated)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|_| ParseSkipped::InvalidRegex)?;

    Ok(Rule::Regex(RegexRule {
        text: pattern.to_string(),
        pattern: compiled,
    }))
}

/// `/.../` with at least one regex metacharacter between the slashes.
///
/// `/ads/` alone stays a substring rule, as most lists intend.
pub fn is_raw_regex(pattern: &str) -> bool {
    pattern.len() > 2
        && pattern.starts_with('/')
        && pattern.ends_with('/')
        && pattern[1..pattern.len() - 1].contains(&['\\', '(', ')', '[', ']', '{', '}', '+', '*', '?', '|', '$'][..])
}

/// Pattern with a trailing `$option,option=value` block removed.
///
/// Options only narrow where a rule applies; the pattern itself still
/// matches on its own.
fn strip_options(pattern: &str) -> &str {
    let Some(idx) = pattern.rfind('$') else {
        return pattern;
    };
    let options = &pattern[idx + 1..];
    let is_options = !options.is_empty()
        && options
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '~' | ',' | '=' | '|' | '.' | '_' | '-'));
    if is_options {
        &pattern[..idx]
    } else {
        pattern
    }
}

/// Translate ABP wildcard syntax into a regular-expression pattern.
///
/// - `/.../` raw regex: the body is returned verbatim
/// - leading `||`: scheme plus optional sub-domain anchor
/// - leading `|` / trailing `|`: start / end of URL
/// - `*`: any run of characters
/// - `^`: a separator character or the end of the URL
///
/// Everything else is escaped and matched literally.
pub fn abp_pattern_to_regex(rule_text: &str) -> String {
    if is_raw_regex(rule_text) {
        return rule_text[1..rule_text.len() - 1].to_string();
    }

    let mut out = String::with_capacity(rule_text.len() * 2);
    let mut body = rule_text;

    if let Some(rest) = body.strip_prefix("||") {
        out.push_str(r"^[a-z][a-z0-9+.\-]*://(?:[^/?#]*\.)?");
        body = rest;
    } else if let Some(rest) = body.strip_prefix('|') {
        out.push('^');
        body = rest;
    }

    let (body, end_anchor) = match body.strip_suffix('|') {
        Some(rest) => (rest, true),
        None => (body, false),
    };

    let mut buf = [0u8; 4];
    for c in body.chars() {
        match c {
            '*' => out.push_str(".*"),
            '^' => out.push_str(r"(?:[^\w.%\-]|$)"),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }

    if end_anchor {
        out.push('$');
    }
    out
}
