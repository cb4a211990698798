//! Aggregator Module
//!
//! Folds parsed reports, one at a time and row by row, into a single [`Summary`].
//! Alongside the summary it keeps the per-report bookkeeping (which documents were
//! folded and who sent them) that the exports embed.
use crate::models::{
    FailureEntry, ParsedReport, ReportInfo, ReporterStats, Row, SourceStats, Summary,
};
use crate::resolver::{HostnameCache, HostnameResolver};
use serde::Serialize;
use std::collections::BTreeMap;

/// Name used for reports whose metadata carries no `org_name`.
pub const UNKNOWN_REPORTER: &str = "unknown";

/// Everything a run accumulated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregate {
    pub summary: Summary,
    pub reports: Vec<ReportInfo>,
    pub reporters: BTreeMap<String, ReporterStats>,
}

/// Owns the run's summary while reports are folded into it.
pub struct Aggregator<'r> {
    aggregate: Aggregate,
    hostnames: HostnameCache<'r>,
}

impl<'r> Aggregator<'r> {
    pub fn new(resolver: &'r dyn HostnameResolver) -> Self {
        Self {
            aggregate: Aggregate::default(),
            hostnames: HostnameCache::new(resolver),
        }
    }

    /// Folds one parsed report, labelled `source` (usually its file path), into the summary.
    pub fn fold(&mut self, source: &str, report: &ParsedReport) {
        let mut messages = 0u64;
        let mut passed = 0u64;
        for row in &report.rows {
            messages = messages.saturating_add(row.count);
            if row.both_pass() {
                passed = passed.saturating_add(row.count);
            }
            self.fold_row(row);
        }

        let metadata = &report.metadata;
        self.aggregate
            .summary
            .date_range
            .widen(metadata.date_begin, metadata.date_end);

        let reporter = metadata
            .org_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_REPORTER);
        let stats = self
            .aggregate
            .reporters
            .entry(reporter.to_string())
            .or_default();
        stats.reports = stats.reports.saturating_add(1);
        stats.messages = stats.messages.saturating_add(messages);
        stats.pass_count = stats.pass_count.saturating_add(passed);
        stats.fail_count = stats.fail_count.saturating_add(messages.saturating_sub(passed));

        self.aggregate.reports.push(ReportInfo {
            source: source.to_string(),
            metadata: metadata.clone(),
            policy: report.policy.clone(),
            records: report.rows.len(),
            messages,
        });
        log::debug!(
            "Folded {}: {} records, {} messages",
            source,
            report.rows.len(),
            messages
        );
    }

    fn fold_row(&mut self, row: &Row) {
        let hostname = self.hostnames.hostname_for(&row.source_ip);
        let summary = &mut self.aggregate.summary;
        let both_pass = row.both_pass();

        let total = summary.total_messages.checked_add(row.count);
        if total.is_none() {
            log::warn!(
                "Message count overflow at {} ({} messages); totals are capped",
                row.source_ip,
                row.count
            );
        }
        summary.total_messages = total.unwrap_or(u64::MAX);
        if both_pass {
            summary.pass_count = summary.pass_count.saturating_add(row.count);
        } else {
            summary.fail_count = summary.fail_count.saturating_add(row.count);
        }

        let stats = summary
            .sources
            .entry_or_insert_with(&row.source_ip, || SourceStats::new(hostname.clone()));
        stats.count = stats.count.saturating_add(row.count);
        if row.spf_pass() {
            stats.spf_pass = stats.spf_pass.saturating_add(row.count);
        }
        if row.dkim_pass() {
            stats.dkim_pass = stats.dkim_pass.saturating_add(row.count);
        }
        if both_pass {
            stats.both_pass = stats.both_pass.saturating_add(row.count);
        } else {
            summary.failures.push(FailureEntry {
                source_ip: row.source_ip.clone(),
                hostname,
                count: row.count,
                spf_result: row.spf_result.clone(),
                dkim_result: row.dkim_result.clone(),
                disposition: row.disposition.clone(),
            });
        }
    }

    pub fn summary(&self) -> &Summary {
        &self.aggregate.summary
    }

    pub fn finish(self) -> Aggregate {
        self.aggregate
    }
}
