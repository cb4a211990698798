//! dmarc-digest - DMARC aggregate report summarizer
//!
//! This tool decodes and parses DMARC aggregate reports (.xml, .xml.gz or .zip), folds
//! every record into one run-wide summary and prints a text report with the top sending
//! sources, failure clusters and a policy recommendation.
//!
//! The summary can also be exported as JSON and CSV, and posted to a webhook.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dmarc_digest::config::Config;
use dmarc_digest::file_handlers::FileHandler;
use dmarc_digest::pipeline;
use dmarc_digest::render::{self, SummaryExport};
use dmarc_digest::resolver::{DnsResolver, HostnameResolver, NoLookup};
use dmarc_digest::webhook::WebhookHandler;
use std::fs::{self, File};
use std::path::PathBuf;

/// CLI arguments for dmarc-digest.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "DMARC aggregate report summarizer in Rust",
    long_about = "dmarc-digest aggregates DMARC aggregate reports into one summary: overall \
                  pass rate, top sending sources, SPF/DKIM failure clusters and a policy \
                  recommendation.\n\n\
                  USAGE:\n  dmarc-digest <FILES>... [--json <FILE>] [-o <FILE>] [--csv <FILE>]",
    override_usage = "dmarc-digest <FILES>... [OPTIONS]"
)]
struct Cli {
    /// DMARC report files (.xml, .xml.gz or .zip)
    #[arg(required = true, value_parser)]
    files: Vec<PathBuf>,

    /// Write the JSON export to this file
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    /// Write the text report to this file instead of standard output
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write the per-source table as CSV to this file
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// Show source IPs without reverse DNS lookups
    #[arg(long)]
    no_resolve: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity.
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    eprintln!(
        "{}\n{}\n",
        "dmarc-digest - DMARC Aggregate Report Summarizer".bold().green(),
        "Decoding, parsing & aggregating DMARC reports".dimmed()
    );

    let config = Config::new().context("Failed to load configuration")?;

    let resolver = build_resolver(cli.no_resolve, &config);
    let handler = FileHandler::new(config.clone());
    let outcome = pipeline::run(&cli.files, &handler, resolver.as_ref());
    // The DNS resolver owns a runtime of its own; release it before starting another.
    drop(resolver);

    if outcome.ingest.processed == 0 {
        log::warn!("{}", "No reports could be processed.".yellow());
    }

    let report = render::text_report(&outcome);
    match &cli.output {
        Some(path) => {
            fs::write(path, format!("{}\n", report))
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            log::info!("Text report written to {}", path.display());
        }
        None => println!("{}", report),
    }

    let export = SummaryExport::new(&outcome);
    if let Some(path) = &cli.json {
        let json = export.to_json().context("Failed to serialize JSON export")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write JSON to {}", path.display()))?;
        log::info!("JSON export written to {}", path.display());
    }

    if let Some(path) = &cli.csv {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        render::write_sources_csv(&outcome.aggregate.summary, file)
            .with_context(|| format!("Failed to write CSV to {}", path.display()))?;
        log::info!("CSV export written to {}", path.display());
    }

    if let Some(url) = &config.webhook_url {
        log::info!("Sending results to webhook: {}", url);
        let webhook = WebhookHandler::new(url, config.webhook_timeout(), config.webhook_retries)?;
        let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
        runtime.block_on(webhook.send(&export))?;
    }

    log::info!("{}", "Analysis complete!".bold().cyan());
    Ok(())
}

/// Picks reverse DNS unless disabled; a resolver that cannot start falls back to IPs.
fn build_resolver(no_resolve: bool, config: &Config) -> Box<dyn HostnameResolver> {
    if no_resolve {
        return Box::new(NoLookup);
    }
    match DnsResolver::new(config.dns_timeout()) {
        Ok(resolver) => Box::new(resolver),
        Err(e) => {
            log::warn!("Reverse DNS unavailable, showing IP addresses: {}", e);
            Box::new(NoLookup)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_usage_line() {
        let mut cmd = Cli::command();
        let usage = cmd.render_usage().to_string();
        assert!(usage.contains("dmarc-digest <FILES>... [OPTIONS]"), "{}", usage);
    }

    #[test]
    fn test_cli_requires_a_file() {
        assert!(Cli::try_parse_from(["dmarc-digest"]).is_err());
    }

    #[test]
    fn test_cli_options() {
        let cli = Cli::try_parse_from([
            "dmarc-digest",
            "a.xml",
            "b.zip",
            "--json",
            "out.json",
            "-o",
            "report.txt",
            "--csv",
            "sources.csv",
            "--no-resolve",
        ])
        .unwrap();
        assert_eq!(cli.files, vec![PathBuf::from("a.xml"), PathBuf::from("b.zip")]);
        assert_eq!(cli.json, Some(PathBuf::from("out.json")));
        assert_eq!(cli.output, Some(PathBuf::from("report.txt")));
        assert_eq!(cli.csv, Some(PathBuf::from("sources.csv")));
        assert!(cli.no_resolve);
        assert!(!cli.verbose);
    }
}
