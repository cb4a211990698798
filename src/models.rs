//! Data Models Module
//!
//! This module defines the core data structures used by dmarc-digest: the pieces of a
//! parsed aggregate report (metadata, published policy, evaluated rows) and the running
//! statistics the aggregator folds them into.
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Result string that counts as a successful SPF or DKIM evaluation.
pub const PASS: &str = "pass";

/// The `<report_metadata>` block of one report document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ReportMetadata {
    pub org_name: Option<String>,
    pub email: Option<String>,
    pub report_id: Option<String>,
    pub date_begin: Option<i64>,
    pub date_end: Option<i64>,
}

/// The `<policy_published>` block: the domain's DMARC record when the report was generated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PolicyInfo {
    pub domain: Option<String>,
    pub p: Option<String>,
    pub sp: Option<String>,
    pub adkim: Option<String>,
    pub aspf: Option<String>,
    pub pct: Option<String>,
}

/// One `<record>` reduced to what the aggregator needs.
///
/// `spf_result` and `dkim_result` keep the document's wording verbatim; an absent
/// element is recorded as `"fail"`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Row {
    pub source_ip: String,
    pub count: u64,
    pub spf_result: String,
    pub dkim_result: String,
    pub disposition: String,
}

impl Row {
    pub fn spf_pass(&self) -> bool {
        self.spf_result == PASS
    }

    pub fn dkim_pass(&self) -> bool {
        self.dkim_result == PASS
    }

    pub fn both_pass(&self) -> bool {
        self.spf_pass() && self.dkim_pass()
    }
}

/// A single report document after parsing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ParsedReport {
    pub metadata: ReportMetadata,
    pub policy: PolicyInfo,
    pub rows: Vec<Row>,
}

/// Per-source rollup across every folded document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct SourceStats {
    pub count: u64,
    pub spf_pass: u64,
    pub dkim_pass: u64,
    pub both_pass: u64,
    pub hostname: String,
}

impl SourceStats {
    pub fn new(hostname: impl Into<String>) -> Self {
        SourceStats {
            hostname: hostname.into(),
            ..Default::default()
        }
    }
}

/// Source statistics keyed by IP, iterated in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: Vec<(String, SourceStats)>,
    index: HashMap<String, usize>,
}

impl SourceTable {
    pub fn get(&self, ip: &str) -> Option<&SourceStats> {
        self.index.get(ip).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.index.contains_key(ip)
    }

    /// Returns the entry for `ip`, inserting one built by `init` on first sight.
    pub fn entry_or_insert_with<F>(&mut self, ip: &str, init: F) -> &mut SourceStats
    where
        F: FnOnce() -> SourceStats,
    {
        let i = match self.index.get(ip) {
            Some(&i) => i,
            None => {
                self.entries.push((ip.to_string(), init()));
                let i = self.entries.len() - 1;
                self.index.insert(ip.to_string(), i);
                i
            }
        };
        &mut self.entries[i].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceStats)> {
        self.entries.iter().map(|(ip, stats)| (ip.as_str(), stats))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for SourceTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (ip, stats) in &self.entries {
            map.serialize_entry(ip, stats)?;
        }
        map.end()
    }
}

/// One non-passing row, kept verbatim. The failure list is a log, never merged.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FailureEntry {
    pub source_ip: String,
    pub hostname: String,
    pub count: u64,
    pub spf_result: String,
    pub dkim_result: String,
    pub disposition: String,
}

/// Span covered by the folded reports, as UNIX timestamps.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct DateRange {
    pub begin: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    /// Widens the range to include `begin`/`end`; absent bounds leave it untouched.
    pub fn widen(&mut self, begin: Option<i64>, end: Option<i64>) {
        if let Some(b) = begin {
            self.begin = Some(self.begin.map_or(b, |cur| cur.min(b)));
        }
        if let Some(e) = end {
            self.end = Some(self.end.map_or(e, |cur| cur.max(e)));
        }
    }
}

/// The run-wide aggregate. Only the aggregator mutates it.
#[derive(Debug, Serialize, Clone, Default)]
pub struct Summary {
    pub total_messages: u64,
    pub pass_count: u64,
    pub fail_count: u64,
    pub sources: SourceTable,
    pub failures: Vec<FailureEntry>,
    pub date_range: DateRange,
}

/// What was learned about one folded document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReportInfo {
    pub source: String,
    pub metadata: ReportMetadata,
    pub policy: PolicyInfo,
    pub records: usize,
    pub messages: u64,
}

/// Totals per reporting organisation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ReporterStats {
    pub reports: u32,
    pub messages: u64,
    pub pass_count: u64,
    pub fail_count: u64,
}

/// DMARC `p=` values, used when recommending the next policy step.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    #[default]
    None,
    Quarantine,
    Reject,
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyType::None => write!(f, "none"),
            PolicyType::Quarantine => write!(f, "quarantine"),
            PolicyType::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for PolicyType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(PolicyType::None),
            "quarantine" => Ok(PolicyType::Quarantine),
            "reject" => Ok(PolicyType::Reject),
            _ => Err(format!("Invalid policy type: {}", s)),
        }
    }
}
