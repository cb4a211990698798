//! Rendering Module
//!
//! Presentation of a finished run: the fixed-section text report, the JSON export and
//! the per-source CSV table. Nothing here changes the summary.
use crate::error::Result;
use crate::models::{DateRange, ReportInfo, ReporterStats, Summary};
use crate::pipeline::{IngestStats, IngestWarning, RunOutcome};
use crate::ranking::{cluster_failures, rank_sources, top_sources, FailureCluster, TOP_SOURCES};
use crate::recommendations::{published_policy, recommend, Advisory, PolicyTier};
use chrono::{DateTime, SecondsFormat, Utc};
use prettytable::format::{Alignment, FormatBuilder, LinePosition, LineSeparator};
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

const RULE_WIDTH: usize = 70;
const HOST_COLUMN: usize = 38;
const SECONDS_PER_DAY: i64 = 86_400;

/// Renders the human-readable report for `outcome`.
pub fn text_report(outcome: &RunOutcome) -> String {
    let aggregate = &outcome.aggregate;
    let summary = &aggregate.summary;
    let mut lines: Vec<String> = Vec::new();

    lines.push("=".repeat(RULE_WIDTH));
    lines.push("DMARC Aggregate Report Summary".to_string());
    lines.push("=".repeat(RULE_WIDTH));

    if let Some(begin) = summary.date_range.begin {
        lines.push(format!(
            "Report period: {} to {}",
            format_timestamp(begin),
            summary
                .date_range
                .end
                .map(format_timestamp)
                .unwrap_or_else(|| "unknown".to_string())
        ));
        if let Some(days) = days_covered(&summary.date_range) {
            lines.push(format!("Days covered: {}", days));
        }
    }
    let ingest = &outcome.ingest;
    lines.push(format!(
        "Reports processed: {} of {} ({} failed, {} missing)",
        ingest.processed, ingest.files_total, ingest.failed, ingest.missing
    ));
    lines.push(String::new());

    lines.push("[Overall Summary]".to_string());
    lines.push(format!("Total messages:  {}", thousands(summary.total_messages)));
    lines.push(format!(
        "Passed:          {} ({:.1}%)",
        thousands(summary.pass_count),
        percent(summary.pass_count, summary.total_messages)
    ));
    lines.push(format!(
        "Failed:          {} ({:.1}%)",
        thousands(summary.fail_count),
        percent(summary.fail_count, summary.total_messages)
    ));
    lines.push(String::new());

    lines.push("[Sending Sources]".to_string());
    let mut table = report_table();
    table.set_titles(Row::new(vec![
        Cell::new("IP/Hostname"),
        right("Count"),
        right("SPF"),
        right("DKIM"),
        right("Both"),
    ]));
    let (shown, hidden) = top_sources(summary, TOP_SOURCES);
    for source in &shown {
        table.add_row(Row::new(vec![
            host_cell(&source.stats.hostname),
            right(&thousands(source.stats.count)),
            right(&format!("{:.1}%", source.rates.spf * 100.0)),
            right(&format!("{:.1}%", source.rates.dkim * 100.0)),
            right(&format!("{:.1}%", source.rates.both * 100.0)),
        ]));
    }
    push_table(&mut lines, &table);
    if hidden > 0 {
        lines.push(format!("... +{} more sources", hidden));
    }
    lines.push(String::new());

    if !aggregate.reporters.is_empty() {
        lines.push("[Reporting Organizations]".to_string());
        let mut table = report_table();
        table.set_titles(Row::new(vec![
            Cell::new("Organization"),
            right("Reports"),
            right("Messages"),
            right("Pass"),
        ]));
        for (name, stats) in &aggregate.reporters {
            table.add_row(Row::new(vec![
                host_cell(name),
                right(&stats.reports.to_string()),
                right(&thousands(stats.messages)),
                right(&format!("{:.1}%", percent(stats.pass_count, stats.messages))),
            ]));
        }
        push_table(&mut lines, &table);
        lines.push(String::new());
    }

    let clusters = cluster_failures(summary);
    if !clusters.is_empty() {
        lines.push("[Authentication Failures]".to_string());
        for cluster in &clusters {
            lines.push(format!(
                "SPF={}, DKIM={}: {} messages",
                cluster.spf_result,
                cluster.dkim_result,
                thousands(cluster.count)
            ));
            for host in cluster.shown_hostnames() {
                lines.push(format!("  - {}", host));
            }
            if cluster.hidden_hostnames() > 0 {
                lines.push(format!("  ... +{} more", cluster.hidden_hostnames()));
            }
        }
        lines.push(String::new());
    }

    lines.push("[Recommended Actions]".to_string());
    for advisory in recommend(summary) {
        match &advisory {
            Advisory::Policy { tier, .. } => {
                let marker = match tier {
                    PolicyTier::Reject => "[OK]",
                    PolicyTier::Quarantine => "[!]",
                    PolicyTier::Investigate => "[X]",
                };
                lines.push(format!("{} {}", marker, advisory.headline()));
            }
            Advisory::ProblemSources { sources } => {
                lines.push(format!("[!] {}", advisory.headline()));
                for source in sources {
                    lines.push(format!(
                        "  - {}: {} messages, {} passed",
                        source.hostname,
                        thousands(source.count),
                        thousands(source.both_pass)
                    ));
                }
            }
        }
    }
    if let Some(policy) = published_policy(&aggregate.reports) {
        lines.push(format!("Currently published policy: p={}", policy));
    }
    lines.push("=".repeat(RULE_WIDTH));

    lines.join("\n")
}

/// Covered period as ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub begin: Option<String>,
    pub end: Option<String>,
}

impl From<&DateRange> for Period {
    fn from(range: &DateRange) -> Self {
        Period {
            begin: range.begin.and_then(iso_timestamp),
            end: range.end.and_then(iso_timestamp),
        }
    }
}

/// The JSON export of one run.
#[derive(Debug, Serialize)]
pub struct SummaryExport<'a> {
    pub generated_at: DateTime<Utc>,
    pub period: Period,
    pub summary: &'a Summary,
    pub reports: &'a [ReportInfo],
    pub reporters: &'a BTreeMap<String, ReporterStats>,
    pub failure_clusters: Vec<FailureCluster>,
    pub advisories: Vec<Advisory>,
    pub ingest: &'a IngestStats,
    pub warnings: &'a [IngestWarning],
}

impl<'a> SummaryExport<'a> {
    pub fn new(outcome: &'a RunOutcome) -> Self {
        let summary = &outcome.aggregate.summary;
        SummaryExport {
            generated_at: Utc::now(),
            period: Period::from(&summary.date_range),
            summary,
            reports: &outcome.aggregate.reports,
            reporters: &outcome.aggregate.reporters,
            failure_clusters: cluster_failures(summary),
            advisories: recommend(summary),
            ingest: &outcome.ingest,
            warnings: &outcome.warnings,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Serialize)]
struct SourceRecord<'a> {
    source_ip: &'a str,
    hostname: &'a str,
    count: u64,
    spf_pass: u64,
    dkim_pass: u64,
    both_pass: u64,
    spf_rate: f64,
    dkim_rate: f64,
    both_rate: f64,
}

/// Writes every source, in ranked order, as CSV with a header row.
pub fn write_sources_csv<W: Write>(summary: &Summary, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for source in rank_sources(summary) {
        wtr.serialize(SourceRecord {
            source_ip: source.ip,
            hostname: &source.stats.hostname,
            count: source.stats.count,
            spf_pass: source.stats.spf_pass,
            dkim_pass: source.stats.dkim_pass,
            both_pass: source.stats.both_pass,
            spf_rate: source.rates.spf,
            dkim_rate: source.rates.dkim,
            both_rate: source.rates.both,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Borderless table with a rule under the titles.
fn report_table() -> Table {
    let mut table = Table::new();
    table.set_format(
        FormatBuilder::new()
            .padding(0, 2)
            .separator(LinePosition::Title, LineSeparator::new('-', '-', '-', '-'))
            .build(),
    );
    table
}

fn push_table(lines: &mut Vec<String>, table: &Table) {
    lines.extend(table.to_string().lines().map(|line| line.trim_end().to_string()));
}

/// Host or organisation cell, always `HOST_COLUMN` wide.
fn host_cell(name: &str) -> Cell {
    Cell::new(&format!("{:<width$}", truncate_host(name), width = HOST_COLUMN))
}

fn right(text: &str) -> Cell {
    Cell::new_align(text, Alignment::RIGHT)
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn truncate_host(name: &str) -> String {
    if name.chars().count() > HOST_COLUMN {
        let head: String = name.chars().take(HOST_COLUMN - 3).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

fn format_timestamp(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn iso_timestamp(ts: i64) -> Option<String> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn days_covered(range: &DateRange) -> Option<i64> {
    match (range.begin, range.end) {
        (Some(begin), Some(end)) if end >= begin => Some((end - begin) / SECONDS_PER_DAY + 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::models::{ParsedReport, PolicyInfo, ReportMetadata, Row};
    use crate::resolver::NoLookup;

    fn row(ip: &str, count: u64, spf: &str, dkim: &str) -> Row {
        Row {
            source_ip: ip.to_string(),
            count,
            spf_result: spf.to_string(),
            dkim_result: dkim.to_string(),
            disposition: "none".to_string(),
        }
    }

    fn outcome(rows: Vec<Row>) -> RunOutcome {
        let report = ParsedReport {
            metadata: ReportMetadata {
                org_name: Some("google.com".into()),
                date_begin: Some(1_700_000_000),
                date_end: Some(1_700_086_399),
                ..Default::default()
            },
            policy: PolicyInfo {
                domain: Some("example.com".into()),
                p: Some("none".into()),
                ..Default::default()
            },
            rows,
        };
        let mut aggregator = Aggregator::new(&NoLookup);
        aggregator.fold("report.xml", &report);
        RunOutcome {
            aggregate: aggregator.finish(),
            ingest: IngestStats { files_total: 1, processed: 1, missing: 0, failed: 0 },
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_truncate_host() {
        let short = "mail.example.com";
        assert_eq!(truncate_host(short), short);
        let exact = "a".repeat(38);
        assert_eq!(truncate_host(&exact), exact);
        let long = format!("{}.example.com", "x".repeat(40));
        let cut = truncate_host(&long);
        assert_eq!(cut.chars().count(), 38);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_days_covered() {
        let range = DateRange { begin: Some(0), end: Some(86_399) };
        assert_eq!(days_covered(&range), Some(1));
        let range = DateRange { begin: Some(0), end: Some(7 * 86_400) };
        assert_eq!(days_covered(&range), Some(8));
        assert_eq!(days_covered(&DateRange::default()), None);
    }

    #[test]
    fn test_text_report_sections() {
        let report = text_report(&outcome(vec![
            row("1.2.3.4", 1500, "pass", "pass"),
            row("5.6.7.8", 500, "fail", "pass"),
        ]));
        assert!(report.contains("Report period: 2023-11-14 22:13 UTC to 2023-11-15 22:13 UTC"));
        assert!(report.contains("Days covered: 1"));
        assert!(report.contains("Reports processed: 1 of 1 (0 failed, 0 missing)"));
        assert!(report.contains("Total messages:  2,000"));
        assert!(report.contains("Passed:          1,500 (75.0%)"));
        assert!(report.contains("SPF=fail, DKIM=pass: 500 messages"));
        assert!(report.contains("  - 5.6.7.8"));
        assert!(report.contains("google.com"));
        assert!(report.contains("[X] Pass rate is below 95%"));
        assert!(report.contains("Currently published policy: p=none"));

        let first = report.find("1.2.3.4").unwrap();
        let second = report.find("5.6.7.8").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_source_table_columns_line_up() {
        let report = text_report(&outcome(vec![
            row("1.2.3.4", 1500, "pass", "pass"),
            row("5.6.7.8", 500, "fail", "pass"),
        ]));
        let header = report.lines().find(|l| l.starts_with("IP/Hostname")).unwrap();
        let first = report.lines().find(|l| l.starts_with("1.2.3.4")).unwrap();
        let second = report.lines().find(|l| l.starts_with("5.6.7.8")).unwrap();

        let count_end = header.find("Count").unwrap() + "Count".len();
        assert!(count_end > HOST_COLUMN);
        assert_eq!(first.find("1,500").unwrap() + "1,500".len(), count_end);
        assert_eq!(second.find(" 500").unwrap() + " 500".len(), count_end);
        assert_eq!(first.len(), header.len());
        assert_eq!(second.len(), header.len());
        assert!(first.ends_with("100.0%"));
        assert!(second.ends_with("0.0%"));
    }

    #[test]
    fn test_empty_run_shows_zero_rates() {
        let report = text_report(&RunOutcome::default());
        assert!(report.contains("Passed:          0 (0.0%)"));
        assert!(report.contains("Failed:          0 (0.0%)"));
        assert!(!report.contains("Report period"));
        assert!(!report.contains("[Authentication Failures]"));
        assert!(report.contains("[X] Pass rate is below 95%"));
    }

    #[test]
    fn test_source_table_remainder_line() {
        let rows = (0..25)
            .map(|i| row(&format!("10.0.0.{}", i), 10 + i, "pass", "pass"))
            .collect();
        let report = text_report(&outcome(rows));
        assert!(report.contains("... +5 more sources"));
        assert!(report.contains("10.0.0.24"));
        assert!(!report.contains("10.0.0.4 "));
    }

    #[test]
    fn test_problem_sources_listed() {
        let report = text_report(&outcome(vec![
            row("1.2.3.4", 100, "pass", "pass"),
            row("9.9.9.9", 40, "fail", "fail"),
        ]));
        assert!(report.contains("fail authentication frequently"));
        assert!(report.contains("  - 9.9.9.9: 40 messages, 0 passed"));
    }

    #[test]
    fn test_json_export_keys() {
        let run = outcome(vec![row("1.2.3.4", 10, "pass", "pass")]);
        let json = SummaryExport::new(&run).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for key in [
            "generated_at",
            "period",
            "summary",
            "reports",
            "reporters",
            "failure_clusters",
            "advisories",
            "ingest",
            "warnings",
        ] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(value["period"]["begin"], "2023-11-14T22:13:20Z");
        assert_eq!(value["summary"]["total_messages"], 10);
        assert_eq!(value["summary"]["sources"]["1.2.3.4"]["both_pass"], 10);
        assert_eq!(value["advisories"][0]["kind"], "policy");
        assert_eq!(value["advisories"][0]["tier"], "reject");
        assert_eq!(value["reports"][0]["policy"]["domain"], "example.com");
    }

    #[test]
    fn test_json_export_of_empty_run() {
        let run = RunOutcome::default();
        let value: serde_json::Value =
            serde_json::from_str(&SummaryExport::new(&run).to_json().unwrap()).unwrap();
        assert!(value["period"]["begin"].is_null());
        assert_eq!(value["summary"]["total_messages"], 0);
    }

    #[test]
    fn test_sources_csv() {
        let run = outcome(vec![
            row("5.6.7.8", 4, "pass", "fail"),
            row("1.2.3.4", 10, "pass", "pass"),
        ]);
        let mut out = Vec::new();
        write_sources_csv(&run.aggregate.summary, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "source_ip,hostname,count,spf_pass,dkim_pass,both_pass,spf_rate,dkim_rate,both_rate"
        );
        assert!(lines[1].starts_with("1.2.3.4,1.2.3.4,10,10,10,10,"));
        assert!(lines[2].starts_with("5.6.7.8,5.6.7.8,4,4,0,0,"));
        assert_eq!(lines.len(), 3);
    }
}
