//! Immutable, bucketed rule snapshot
//!
//! A [`RuleStore`] is built once per load and never mutated afterwards.
//! Reloading produces a new store that replaces the old one wholesale.

use std::collections::BTreeMap;

use ahash::AHashMap;
use aho_corasick::AhoCorasick;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::ParseSkipped;
use crate::rules::{parse_line, Bucket, DomainRule, ExactRule, LineOutcome, RegexRule, Rule, SubstringRule};

/// Per-load parsing summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    /// Lines turned into rules
    pub parsed: usize,
    /// Lines that could not be used
    pub skipped: usize,
    /// Blank, comment and header lines
    pub ignored: usize,
    /// Skip counts by reason
    pub skipped_by_reason: BTreeMap<ParseSkipped, usize>,
    /// Rule counts by bucket
    pub buckets: BucketCounts,
}

/// Number of rules stored in each bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    /// `@@` rules
    pub exception: usize,
    /// `||host^` rules
    pub domain: usize,
    /// Segment tokens, duplicates included
    pub exact: usize,
    /// Substrings
    pub substring: usize,
    /// Regular expressions
    pub regex: usize,
}

impl BucketCounts {
    fn record(&mut self, bucket: Bucket) {
        match bucket {
            Bucket::Exception => self.exception += 1,
            Bucket::Domain => self.domain += 1,
            Bucket::Exact => self.exact += 1,
            Bucket::Substring => self.substring += 1,
            Bucket::Regex => self.regex += 1,
        }
    }
}

/// Categorized snapshot of every loaded rule
#[derive(Debug, Default)]
pub struct RuleStore {
    domain_rules: AHashMap<String, Vec<DomainRule>>,
    exact_rules: AHashMap<String, ExactRule>,
    substring_rules: Vec<SubstringRule>,
    substring_prefilter: Option<AhoCorasick>,
    regex_rules: Vec<RegexRule>,
    exception_rules: Vec<Rule>,
    report: ParseReport,
}

impl RuleStore {
    /// Store with no rules; blocks nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse filter-list lines into a new store.
    ///
    /// Lines are classified in parallel and installed in their original
    /// order, so within a bucket the first listed rule stays first.
    pub fn parse<S>(lines: &[S]) -> Self
    where
        S: AsRef<str> + Sync,
    {
        let outcomes: Vec<LineOutcome> = lines.par_iter().map(|line| parse_line(line.as_ref())).collect();

        let mut builder = StoreBuilder::default();
        for outcome in outcomes {
            builder.push(outcome);
        }
        builder.build()
    }

    /// Build a store from already parsed rules
    pub fn from_rules<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = Rule>,
    {
        let mut builder = StoreBuilder::default();
        for rule in rules {
            builder.push(LineOutcome::Parsed(rule));
        }
        builder.build()
    }

    /// Number of successfully classified lines
    pub fn total_rule_count(&self) -> usize {
        self.report.parsed
    }

    /// Whether the store holds no rules at all
    pub fn is_empty(&self) -> bool {
        self.report.parsed == 0
    }

    /// Parsing summary for this store
    pub fn report(&self) -> &ParseReport {
        &self.report
    }

    /// Inner rules of every `@@` exception, in list order
    pub fn exception_rules(&self) -> &[Rule] {
        &self.exception_rules
    }

    /// Domain rules anchored exactly at `host`
    pub fn domain_rules_for(&self, host: &str) -> Option<&[DomainRule]> {
        self.domain_rules.get(host).map(Vec::as_slice)
    }

    /// Exact rule for a lowercased URL segment
    pub fn exact_rule(&self, segment: &str) -> Option<&ExactRule> {
        self.exact_rules.get(segment)
    }

    /// First listed substring rule contained in `lower_url`
    pub fn first_substring(&self, lower_url: &str) -> Option<&SubstringRule> {
        if let Some(prefilter) = &self.substring_prefilter {
            if !prefilter.is_match(lower_url) {
                return None;
            }
        }
        self.substring_rules
            .iter()
            .find(|rule| lower_url.contains(rule.needle.as_str()))
    }

    /// Regex rules, in list order
    pub fn regex_rules(&self) -> &[RegexRule] {
        &self.regex_rules
    }

    /// Whether any domain rules are loaded
    pub(crate) fn has_domain_rules(&self) -> bool {
        !self.domain_rules.is_empty()
    }
}

#[derive(Default)]
struct StoreBuilder {
    store: RuleStore,
}

impl StoreBuilder {
    fn push(&mut self, outcome: LineOutcome) {
        let report = &mut self.store.report;
        match outcome {
            LineOutcome::Ignored => report.ignored += 1,
            LineOutcome::Skipped(reason) => {
                report.skipped += 1;
                *report.skipped_by_reason.entry(reason).or_insert(0) += 1;
            }
            LineOutcome::Parsed(rule) => {
                report.parsed += 1;
                report.buckets.record(rule.bucket());
                self.insert(rule);
            }
        }
    }

    fn insert(&mut self, rule: Rule) {
        let store = &mut self.store;
        match rule {
            Rule::Domain(rule) => store.domain_rules.entry(rule.domain.clone()).or_default().push(rule),
            Rule::Exact(rule) => {
                store.exact_rules.entry(rule.token.clone()).or_insert(rule);
            }
            Rule::Substring(rule) => store.substring_rules.push(rule),
            Rule::Regex(rule) => store.regex_rules.push(rule),
            Rule::Exception(rule) => store.exception_rules.push(*rule.inner),
        }
    }

    fn build(mut self) -> RuleStore {
        let needles = &self.store.substring_rules;
        if !needles.is_empty() {
            self.store.substring_prefilter = AhoCorasick::new(needles.iter().map(|rule| rule.needle.as_str())).ok();
        }
        self.store
    }
}
