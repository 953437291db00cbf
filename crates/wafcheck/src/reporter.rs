//! Reporters for run results.
//!
//! - `TerminalReporter`: colored summary and failure list
//! - `HtmlReporter` / `TextReporter`: per-failure detail documents
//! - `JsonReporter`: machine-readable run summary
//! - `ReportWriter`: writes reports to disk

use crate::config::ReportFormat;
use crate::correlate::RuleCorrelator;
use crate::driver::TestOutcome;
use crate::materialize::MaterializedTest;
use crate::profile::ProfileStore;
use crate::runner::RunResults;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use wafcheck_engine::VariableEntry;

const NO_LOGS: &str = "No logs...";

/// Errors that can occur while writing reports.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to write a report file.
    #[error("failed to write report {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the JSON summary.
    #[error("failed to serialize report: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Failed to re-serialize a stage definition.
    #[error("failed to serialize stage: {0}")]
    StageError(#[from] serde_yaml::Error),
}

// ============================================================================
// Terminal
// ============================================================================

/// Verbosity level for terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only the summary.
    Quiet,
    #[default]
    Normal,
    /// Per-test lines as well.
    Verbose,
}

/// Colored terminal output for run results.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    verbosity: Verbosity,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// Line printed for a finished test in verbose mode.
    pub fn test_line(&self, name: &str, passed: bool) -> Option<String> {
        if self.verbosity != Verbosity::Verbose {
            return None;
        }
        let status = if passed {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };
        Some(format!("  {status} {name}"))
    }

    /// Prints the counts, percentage and duration.
    pub fn print_summary(&self, results: &RunResults) {
        println!("\n{}", "━".repeat(40).dimmed());

        let (verdict, color) = if results.admitted == 0 {
            ("NO TESTS RAN", colored::Color::Yellow)
        } else if results.failed == 0 {
            ("PASSED", colored::Color::Green)
        } else if results.passed > 0 {
            ("MIXED", colored::Color::Yellow)
        } else {
            ("FAILED", colored::Color::Red)
        };
        println!(
            "{}",
            format!("{verdict}: {}", results.summary_line())
                .color(color)
                .bold()
        );

        let mut parts = vec![
            format!("{} passed", results.passed).green().to_string(),
            format!("{} failed", results.failed).red().to_string(),
        ];
        if results.ignored > 0 {
            parts.push(format!("{} ignored", results.ignored).dimmed().to_string());
        }
        if results.excluded > 0 {
            parts.push(format!("{} excluded", results.excluded).dimmed().to_string());
        }
        if results.dropped > 0 {
            parts.push(format!("{} dropped", results.dropped).yellow().to_string());
        }
        println!("   {}", parts.join(", "));

        if results.admitted == 0 {
            println!("   {}", "No tests ran".yellow());
        }

        println!(
            "\n   {}",
            format!("Completed in {:.1}s", results.duration.as_secs_f64()).dimmed()
        );
    }

    /// Prints failed, excluded and dropped test names.
    pub fn print_failures(&self, results: &RunResults) {
        if !results.failures.is_empty() {
            println!("\n{}", "Failed tests:".red().bold());
            for name in &results.failures {
                println!("  {} {}", "✗".red(), name);
            }
        }

        if self.verbosity == Verbosity::Quiet {
            return;
        }

        if !results.excluded_names.is_empty() {
            println!("\n{}", "Excluded tests:".bold());
            for name in &results.excluded_names {
                println!("  - {}", name.dimmed());
            }
        }

        if !results.dropped_names.is_empty() {
            println!("\n{}", "Dropped stages:".yellow().bold());
            for name in &results.dropped_names {
                println!("  - {name}");
            }
        }

        if !results.reports.is_empty() {
            println!(
                "\n   {}",
                format!("{} failure reports written", results.reports.len()).dimmed()
            );
        }
    }
}

// ============================================================================
// Failure reports
// ============================================================================

/// A captured log line with the rule it was traced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedLine {
    pub line: String,
    /// Rule source, chain included; empty when the line could not be traced.
    pub rule_source: String,
}

/// Everything shown in one failure report.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub command_line: String,
    pub name: String,
    pub profile_path: PathBuf,
    /// The stage definition, re-serialized as YAML.
    pub stage_yaml: String,
    /// The synthesized request as HTTP text.
    pub request: String,
    pub correlated: Vec<CorrelatedLine>,
    pub debug_lines: Vec<String>,
    pub discrepancies: Vec<String>,
    pub variables: Vec<VariableEntry>,
}

impl FailureReport {
    /// Collects the report for a failed test.
    pub fn build(
        command_line: &str,
        store: &ProfileStore,
        test: &MaterializedTest,
        outcome: &TestOutcome,
        correlator: &RuleCorrelator<'_>,
    ) -> Result<Self, ReportError> {
        let stage_yaml = match store
            .test_case(test.origin.profile, test.origin.case)
            .and_then(|case| case.stages.get(test.origin.stage))
        {
            Some(entry) => serde_yaml::to_string(entry)?,
            None => String::new(),
        };

        Ok(Self {
            command_line: command_line.to_string(),
            name: test.name.clone(),
            profile_path: test.origin.profile_path.clone(),
            stage_yaml,
            request: test.request.to_http(),
            correlated: outcome
                .error_lines
                .iter()
                .map(|line| CorrelatedLine {
                    line: line.clone(),
                    rule_source: correlator.correlate(line),
                })
                .collect(),
            debug_lines: outcome.debug_lines.clone(),
            discrepancies: outcome.errors.clone(),
            variables: outcome.variables.clone(),
        })
    }

    /// File name for this report. Bytes outside `[A-Za-z0-9.-]` become
    /// `_XX` (uppercase hex), so distinct names never share a file.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.name.len());
        for byte in self.name.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-') {
                stem.push(char::from(byte));
            } else {
                stem.push_str(&format!("_{byte:02X}"));
            }
        }
        stem
    }
}

/// Escape text for HTML.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// HTML failure report.
#[derive(Debug, Default)]
pub struct HtmlReporter;

impl HtmlReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, report: &FailureReport) -> String {
        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        out.push_str(&format!("<title>{}</title>\n", escape_html(&report.name)));
        out.push_str("</head>\n<body>\n");

        out.push_str(&format!("<h1>{}</h1>\n", escape_html(&report.name)));
        out.push_str(&format!(
            "<p>Profile: <code>{}</code></p>\n",
            escape_html(&report.profile_path.display().to_string())
        ));

        section(&mut out, "Command", &report.command_line);
        section(&mut out, "Test", &report.stage_yaml);
        section(&mut out, "Request", &report.request);

        out.push_str("<h2>Logs</h2>\n");
        if report.correlated.is_empty() {
            out.push_str(&format!("<p>{NO_LOGS}</p>\n"));
        } else {
            for entry in &report.correlated {
                out.push_str(&format!("<pre>{}</pre>\n", escape_html(&entry.line)));
                if !entry.rule_source.is_empty() {
                    out.push_str(&format!(
                        "<h3>Rule</h3>\n<pre>{}</pre>\n",
                        escape_html(&entry.rule_source)
                    ));
                }
            }
        }

        out.push_str("<h2>Discrepancies</h2>\n<ul>\n");
        for message in &report.discrepancies {
            out.push_str(&format!("<li>{}</li>\n", escape_html(message)));
        }
        out.push_str("</ul>\n");

        section(&mut out, "Debug log", &report.debug_lines.join("\n"));

        out.push_str("<h2>Variables</h2>\n<table>\n");
        out.push_str("<tr><th>Collection</th><th>Key</th><th>Value</th></tr>\n");
        for var in &report.variables {
            out.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(&var.collection),
                escape_html(&var.key),
                escape_html(&var.value)
            ));
        }
        out.push_str("</table>\n</body>\n</html>\n");
        out
    }
}

fn section(out: &mut String, title: &str, body: &str) {
    out.push_str(&format!("<h2>{title}</h2>\n<pre>{}</pre>\n", escape_html(body)));
}

/// Plain-text failure report.
#[derive(Debug, Default)]
pub struct TextReporter;

impl TextReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, report: &FailureReport) -> String {
        let mut out = String::new();
        out.push_str(&format!("Test: {}\n", report.name));
        out.push_str(&format!("Profile: {}\n", report.profile_path.display()));
        out.push_str(&format!("Command: {}\n", report.command_line));

        out.push_str("\n== Test ==\n");
        out.push_str(&report.stage_yaml);
        out.push_str("\n== Request ==\n");
        out.push_str(&report.request);

        out.push_str("\n\n== Logs ==\n");
        if report.correlated.is_empty() {
            out.push_str(NO_LOGS);
            out.push('\n');
        }
        for entry in &report.correlated {
            out.push_str(&entry.line);
            out.push('\n');
            if !entry.rule_source.is_empty() {
                out.push_str("  rule:\n");
                for line in entry.rule_source.lines() {
                    out.push_str(&format!("    {line}\n"));
                }
            }
        }

        out.push_str("\n== Discrepancies ==\n");
        for message in &report.discrepancies {
            out.push_str(&format!("- {message}\n"));
        }

        out.push_str("\n== Debug log ==\n");
        for line in &report.debug_lines {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str("\n== Variables ==\n");
        for var in &report.variables {
            if var.key.is_empty() {
                out.push_str(&format!("{} = {}\n", var.collection, var.value));
            } else {
                out.push_str(&format!("{}:{} = {}\n", var.collection, var.key, var.value));
            }
        }
        out
    }
}

// ============================================================================
// JSON summary
// ============================================================================

/// Machine-readable summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub wafcheck_version: String,
    pub admitted: usize,
    pub passed: usize,
    pub failed: usize,
    pub ignored: usize,
    pub excluded: usize,
    pub dropped: usize,
    /// Two-decimal percentage, e.g. `70.00%`.
    pub percentage: String,
    pub duration_secs: f64,
    pub failures: Vec<String>,
    pub excluded_names: Vec<String>,
    pub reports: Vec<PathBuf>,
}

/// Generates the JSON run summary.
#[derive(Debug, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn build_summary(&self, results: &RunResults) -> RunSummary {
        RunSummary {
            timestamp: Utc::now(),
            wafcheck_version: crate::VERSION.to_string(),
            admitted: results.admitted,
            passed: results.passed,
            failed: results.failed,
            ignored: results.ignored,
            excluded: results.excluded,
            dropped: results.dropped,
            percentage: results.percentage_display(),
            duration_secs: results.duration.as_secs_f64(),
            failures: results.failures.clone(),
            excluded_names: results.excluded_names.clone(),
            reports: results.reports.clone(),
        }
    }

    pub fn generate(&self, results: &RunResults) -> Result<String, ReportError> {
        serde_json::to_string_pretty(&self.build_summary(results)).map_err(ReportError::from)
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Writes failure reports into an output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
    format: ReportFormat,
}

impl ReportWriter {
    pub fn new(output_dir: PathBuf, format: ReportFormat) -> Self {
        Self { output_dir, format }
    }

    /// Writes one failure report, creating the directory if needed.
    pub fn write_failure(&self, report: &FailureReport) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ReportError::WriteError {
            path: self.output_dir.clone(),
            source,
        })?;

        let content = match self.format {
            ReportFormat::Html => HtmlReporter::new().generate(report),
            ReportFormat::Text => TextReporter::new().generate(report),
        };
        let path = self
            .output_dir
            .join(format!("{}.{}", report.file_stem(), self.format.extension()));
        write_file(&path, &content)?;
        Ok(path)
    }
}

/// Writes the JSON run summary to `path`.
pub fn write_summary_json(path: &Path, results: &RunResults) -> Result<(), ReportError> {
    let content = JsonReporter::new().generate(results)?;
    write_file(path, &content)
}

fn write_file(path: &Path, content: &str) -> Result<(), ReportError> {
    std::fs::write(path, content).map_err(|source| ReportError::WriteError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn report() -> FailureReport {
        FailureReport {
            command_line: "wafcheck -d tests -r rules.conf".to_string(),
            name: "941100-1#2".to_string(),
            profile_path: PathBuf::from("tests/941100.yaml"),
            stage_yaml: "stage:\n  input:\n    uri: /?q=<script>\n".to_string(),
            request: "GET /?q=<script> HTTP/1.1\r\n\r\n".to_string(),
            correlated: vec![CorrelatedLine {
                line: "[id \"941100\"] XSS".to_string(),
                rule_source: "SecRule ARGS \"@rx <script\" \"id:941100,deny\"".to_string(),
            }],
            debug_lines: vec!["[tx-00000001] rule 941100 matched".to_string()],
            discrepancies: vec!["Expected rule 941100 to not be triggered".to_string()],
            variables: vec![VariableEntry {
                collection: "ARGS_GET".to_string(),
                key: "q".to_string(),
                value: "<script>".to_string(),
            }],
        }
    }

    fn results() -> RunResults {
        RunResults {
            admitted: 10,
            passed: 7,
            failed: 3,
            excluded: 1,
            failures: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            excluded_names: vec!["x".to_string()],
            duration: Duration::from_millis(1500),
            ..RunResults::default()
        }
    }

    #[test]
    fn test_verbosity_default() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
        assert!(TerminalReporter::new().test_line("a", true).is_none());
        let verbose = TerminalReporter::with_verbosity(Verbosity::Verbose);
        assert!(verbose.test_line("a", false).unwrap().contains('a'));
    }

    #[test]
    fn test_print_summary_does_not_panic() {
        let reporter = TerminalReporter::new();
        reporter.print_summary(&results());
        reporter.print_failures(&results());
        reporter.print_summary(&RunResults::default());
    }

    #[test]
    fn test_html_report_sections() {
        let html = HtmlReporter::new().generate(&report());
        assert!(html.contains("wafcheck -d tests -r rules.conf"));
        assert!(html.contains("tests/941100.yaml"));
        assert!(html.contains("uri: /?q=&lt;script&gt;"));
        assert!(html.contains("SecRule ARGS &quot;@rx &lt;script&quot;"));
        assert!(html.contains("Expected rule 941100 to not be triggered"));
        assert!(html.contains("<td>ARGS_GET</td><td>q</td><td>&lt;script&gt;</td>"));
        assert!(!html.contains(NO_LOGS));
    }

    #[test]
    fn test_reports_without_logs() {
        let mut report = report();
        report.correlated.clear();
        assert!(HtmlReporter::new().generate(&report).contains(NO_LOGS));
        assert!(TextReporter::new().generate(&report).contains(NO_LOGS));
    }

    #[test]
    fn test_text_report() {
        let text = TextReporter::new().generate(&report());
        assert!(text.starts_with("Test: 941100-1#2\n"));
        assert!(text.contains("    SecRule ARGS \"@rx <script\""));
        assert!(text.contains("- Expected rule 941100 to not be triggered"));
        assert!(text.contains("ARGS_GET:q = <script>"));
    }

    #[test]
    fn test_file_stem_is_sanitized() {
        assert_eq!(report().file_stem(), "941100-1_232");
    }

    #[test]
    fn test_file_stems_of_distinct_names_differ() {
        let mut staged = report();
        staged.name = "title#2".to_string();
        let mut literal = report();
        literal.name = "title_2".to_string();
        assert_eq!(staged.file_stem(), "title_232");
        assert_eq!(literal.file_stem(), "title_5F2");
    }

    #[test]
    fn test_writer_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let writer = ReportWriter::new(tmp.path().join("reports"), ReportFormat::Text);
        let path = writer.write_failure(&report()).unwrap();
        assert_eq!(path, tmp.path().join("reports").join("941100-1_232.txt"));
        assert!(std::fs::read_to_string(path).unwrap().contains("941100"));
    }

    #[test]
    fn test_writer_fails_on_unwritable_path() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let writer = ReportWriter::new(blocker.join("reports"), ReportFormat::Html);
        assert!(matches!(
            writer.write_failure(&report()),
            Err(ReportError::WriteError { .. })
        ));
    }

    #[test]
    fn test_json_summary() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("summary.json");
        write_summary_json(&path, &results()).unwrap();

        let summary: RunSummary =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(summary.percentage, "70.00%");
        assert_eq!(summary.failures, vec!["a", "b", "c"]);
        assert_eq!(summary.wafcheck_version, crate::VERSION);
    }
}
