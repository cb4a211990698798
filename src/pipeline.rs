//! Pipeline Module
//!
//! Runs one analysis over a list of report files. Files are decoded and parsed in
//! parallel, since each document stands alone, and then folded into the summary one at
//! a time in the order they were given. A file that is missing, cannot be decoded or
//! does not parse is skipped with a warning; the run itself never fails.
use crate::aggregator::{Aggregate, Aggregator};
use crate::file_handlers::FileHandler;
use crate::models::ParsedReport;
use crate::resolver::HostnameResolver;
use crate::xml_parser::parse_report;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    NotFound,
    Decode,
    Parse,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::NotFound => write!(f, "file not found"),
            WarningKind::Decode => write!(f, "could not read report"),
            WarningKind::Parse => write!(f, "could not parse report"),
        }
    }
}

/// Why one input file contributed nothing to the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestWarning {
    pub path: PathBuf,
    pub kind: WarningKind,
    pub message: String,
}

impl IngestWarning {
    fn new(path: &Path, kind: WarningKind, message: impl fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.path.display(), self.message)
    }
}

/// How many of the input files made it into the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub files_total: usize,
    pub processed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Result of one run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub aggregate: Aggregate,
    pub ingest: IngestStats,
    pub warnings: Vec<IngestWarning>,
}

/// Decodes, parses and folds every file in `paths`.
pub fn run<P>(paths: &[P], handler: &FileHandler, resolver: &dyn HostnameResolver) -> RunOutcome
where
    P: AsRef<Path> + Sync,
{
    let loaded: Vec<Result<ParsedReport, IngestWarning>> = paths
        .par_iter()
        .map(|path| load(path.as_ref(), handler))
        .collect();

    let mut aggregator = Aggregator::new(resolver);
    let mut ingest = IngestStats {
        files_total: paths.len(),
        ..Default::default()
    };
    let mut warnings = Vec::new();

    for (path, result) in paths.iter().zip(loaded) {
        let path = path.as_ref();
        match result {
            Ok(report) => {
                log::info!("Processing file: {}", path.display());
                aggregator.fold(&path.display().to_string(), &report);
                ingest.processed += 1;
            }
            Err(warning) => {
                log::warn!("{}", warning);
                match warning.kind {
                    WarningKind::NotFound => ingest.missing += 1,
                    WarningKind::Decode | WarningKind::Parse => ingest.failed += 1,
                }
                warnings.push(warning);
            }
        }
    }

    RunOutcome {
        aggregate: aggregator.finish(),
        ingest,
        warnings,
    }
}

fn load(path: &Path, handler: &FileHandler) -> Result<ParsedReport, IngestWarning> {
    if !path.exists() {
        return Err(IngestWarning::new(path, WarningKind::NotFound, "no such file"));
    }
    let xml = handler
        .process_file(path)
        .map_err(|e| IngestWarning::new(path, WarningKind::Decode, e))?;
    parse_report(&xml).map_err(|e| IngestWarning::new(path, WarningKind::Parse, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::resolver::NoLookup;
    use tempfile::tempdir;

    const VALID: &str = r#"<feedback>
        <report_metadata><org_name>receiver.example</org_name>
        <date_range><begin>1700000000</begin><end>1700086400</end></date_range></report_metadata>
        <record><row><source_ip>1.2.3.4</source_ip><count>100</count>
        <policy_evaluated><disposition>none</disposition><dkim>pass</dkim><spf>pass</spf></policy_evaluated></row></record>
        <record><row><source_ip>5.6.7.8</source_ip><count>50</count>
        <policy_evaluated><disposition>none</disposition><dkim>pass</dkim><spf>fail</spf></policy_evaluated></row></record>
    </feedback>"#;

    #[test]
    fn test_malformed_document_is_skipped() -> std::io::Result<()> {
        let dir = tempdir()?;
        let good = dir.path().join("good.xml");
        let bad = dir.path().join("bad.xml");
        std::fs::write(&good, VALID)?;
        std::fs::write(&bad, "<feedback><record>")?;

        let handler = FileHandler::new(Config::default());
        let outcome = run(&[bad.clone(), good], &handler, &NoLookup);

        let summary = &outcome.aggregate.summary;
        assert_eq!(summary.total_messages, 150);
        assert_eq!(summary.pass_count, 100);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].path, bad);
        assert_eq!(outcome.warnings[0].kind, WarningKind::Parse);
        assert_eq!(
            outcome.ingest,
            IngestStats { files_total: 2, processed: 1, missing: 0, failed: 1 }
        );
        Ok(())
    }

    #[test]
    fn test_all_inputs_missing_gives_empty_summary() {
        let handler = FileHandler::new(Config::default());
        let outcome = run(&["/nonexistent/a.xml", "/nonexistent/b.xml.gz"], &handler, &NoLookup);
        assert_eq!(outcome.aggregate.summary.total_messages, 0);
        assert!(outcome.aggregate.reports.is_empty());
        assert_eq!(outcome.ingest.missing, 2);
        assert!(outcome.warnings.iter().all(|w| w.kind == WarningKind::NotFound));
    }

    #[test]
    fn test_no_inputs() {
        let handler = FileHandler::new(Config::default());
        let paths: [&str; 0] = [];
        let outcome = run(&paths, &handler, &NoLookup);
        assert_eq!(outcome.ingest, IngestStats::default());
        assert_eq!(outcome.aggregate.summary.date_range.begin, None);
    }

    #[test]
    fn test_reports_fold_in_input_order() -> std::io::Result<()> {
        let dir = tempdir()?;
        let mut paths = Vec::new();
        for (i, ip) in ["10.0.0.3", "10.0.0.1", "10.0.0.2"].iter().enumerate() {
            let path = dir.path().join(format!("r{}.xml", i));
            std::fs::write(
                &path,
                format!(
                    "<feedback><record><row><source_ip>{}</source_ip><count>5</count>\
                     <policy_evaluated><dkim>pass</dkim><spf>pass</spf></policy_evaluated>\
                     </row></record></feedback>",
                    ip
                ),
            )?;
            paths.push(path);
        }
        let handler = FileHandler::new(Config::default());
        let outcome = run(&paths, &handler, &NoLookup);
        let order: Vec<&str> = outcome.aggregate.summary.sources.iter().map(|(ip, _)| ip).collect();
        assert_eq!(order, vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]);
        assert_eq!(outcome.aggregate.reports[0].source, paths[0].display().to_string());
        Ok(())
    }

    #[test]
    fn test_warning_display_names_the_file() {
        let warning = IngestWarning::new(Path::new("broken.xml.gz"), WarningKind::Decode, "bad header");
        assert_eq!(
            warning.to_string(),
            "could not read report: broken.xml.gz (bad header)"
        );
    }
}
