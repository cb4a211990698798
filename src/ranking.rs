//! Ranking Module
//!
//! Read-only views over a finished [`Summary`]: sources ranked by volume, per-source
//! pass rates, failures clustered by their SPF/DKIM outcome, and the sources that fail
//! often enough to deserve attention.
use crate::models::{SourceStats, Summary};
use serde::Serialize;
use std::collections::HashMap;

/// Sources listed in the text report.
pub const TOP_SOURCES: usize = 20;
/// Hostnames listed under each failure cluster.
pub const CLUSTER_HOSTNAMES_SHOWN: usize = 5;
/// A source needs at least this many messages before it can be flagged.
pub const PROBLEM_MIN_MESSAGES: u64 = 10;
/// Flag sources whose SPF+DKIM pass ratio is below this.
pub const PROBLEM_PASS_RATIO: f64 = 0.5;
/// Flagged sources listed in the recommendations.
pub const PROBLEM_SOURCES_SHOWN: usize = 5;

/// Pass ratios of one source, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceRates {
    pub spf: f64,
    pub dkim: f64,
    pub both: f64,
}

impl SourceRates {
    pub fn of(stats: &SourceStats) -> Self {
        let ratio = |n: u64| {
            if stats.count == 0 {
                0.0
            } else {
                n as f64 / stats.count as f64
            }
        };
        SourceRates {
            spf: ratio(stats.spf_pass),
            dkim: ratio(stats.dkim_pass),
            both: ratio(stats.both_pass),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankedSource<'a> {
    pub ip: &'a str,
    pub stats: &'a SourceStats,
    pub rates: SourceRates,
}

/// All sources by descending message count; equal counts keep first-seen order.
pub fn rank_sources(summary: &Summary) -> Vec<RankedSource<'_>> {
    let mut ranked: Vec<RankedSource<'_>> = summary
        .sources
        .iter()
        .map(|(ip, stats)| RankedSource {
            ip,
            stats,
            rates: SourceRates::of(stats),
        })
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.stats.count.cmp(&a.stats.count));
    ranked
}

/// The first `limit` ranked sources and how many were left out.
pub fn top_sources(summary: &Summary, limit: usize) -> (Vec<RankedSource<'_>>, usize) {
    let mut ranked = rank_sources(summary);
    let hidden = ranked.len().saturating_sub(limit);
    ranked.truncate(limit);
    (ranked, hidden)
}

/// Failures sharing one SPF/DKIM outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureCluster {
    pub spf_result: String,
    pub dkim_result: String,
    pub count: u64,
    /// Distinct hostnames, in the order they first failed this way.
    pub hostnames: Vec<String>,
}

impl FailureCluster {
    /// The `spf_dkim` key the cluster is known by.
    pub fn key(&self) -> String {
        format!("{}_{}", self.spf_result, self.dkim_result)
    }

    pub fn shown_hostnames(&self) -> &[String] {
        &self.hostnames[..self.hostnames.len().min(CLUSTER_HOSTNAMES_SHOWN)]
    }

    pub fn hidden_hostnames(&self) -> usize {
        self.hostnames.len().saturating_sub(CLUSTER_HOSTNAMES_SHOWN)
    }
}

/// Groups the failure log by outcome, largest cluster first.
pub fn cluster_failures(summary: &Summary) -> Vec<FailureCluster> {
    let mut clusters: Vec<FailureCluster> = Vec::new();
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    for failure in &summary.failures {
        let key = (failure.spf_result.as_str(), failure.dkim_result.as_str());
        let i = *index.entry(key).or_insert_with(|| {
            clusters.push(FailureCluster {
                spf_result: failure.spf_result.clone(),
                dkim_result: failure.dkim_result.clone(),
                count: 0,
                hostnames: Vec::new(),
            });
            clusters.len() - 1
        });
        let cluster = &mut clusters[i];
        cluster.count = cluster.count.saturating_add(failure.count);
        if !cluster.hostnames.contains(&failure.hostname) {
            cluster.hostnames.push(failure.hostname.clone());
        }
    }
    clusters.sort_by(|a, b| b.count.cmp(&a.count));
    clusters
}

/// Sources with enough volume and a low SPF+DKIM pass ratio, in ranked order.
pub fn problem_sources(summary: &Summary) -> Vec<RankedSource<'_>> {
    rank_sources(summary)
        .into_iter()
        .filter(|s| s.stats.count >= PROBLEM_MIN_MESSAGES && s.rates.both < PROBLEM_PASS_RATIO)
        .take(PROBLEM_SOURCES_SHOWN)
        .collect()
}
