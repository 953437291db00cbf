//! wafcheck binary: command-line entry point for the test runner.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wafcheck::{
    FileConfig, ProgressCallback, ProgressEvent, ReportFormat, RunContext, TerminalReporter,
    TestRunner, Verbosity, write_summary_json,
};

#[derive(Parser, Debug)]
#[command(name = "wafcheck", version, about)]
struct Cli {
    /// Root directory of test profiles
    #[arg(short = 'd', long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Ruleset files, comma-separated; globs are expanded. Repeatable
    #[arg(short, long, value_name = "LIST")]
    rules: Vec<String>,

    /// Directory for per-failure reports
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Format of per-failure reports
    #[arg(long, value_enum)]
    report_format: Option<ReportFormat>,

    /// Only run tests whose name matches this regex
    #[arg(short, long, value_name = "REGEX", conflicts_with = "exclude")]
    include: Option<String>,

    /// Skip tests whose name matches this regex
    #[arg(short, long, value_name = "REGEX")]
    exclude: Option<String>,

    /// Always skip this test and report it as excluded. Repeatable
    #[arg(long, value_name = "NAME")]
    skip: Vec<String>,

    /// YAML mapping of test names to leave out of the failure tally
    #[arg(long, value_name = "PATH")]
    ignore: Option<PathBuf>,

    /// Per-test timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Exit with status 1 when any test fails
    #[arg(long)]
    fail_on_failures: bool,

    /// Write a JSON run summary to this path
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,

    /// Optional YAML config file; command-line values take precedence
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print only the summary
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Debug logging and per-test results
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// The command-line settings as a config layer.
    fn layer(&self) -> FileConfig {
        FileConfig {
            input: self.input.clone(),
            rules: self.rules.clone(),
            output: self.output.clone(),
            report_format: self.report_format,
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            exceptions: self.skip.clone(),
            ignore: self.ignore.clone(),
            timeout_secs: self.timeout,
            fail_on_failures: self.fail_on_failures.then_some(true),
            summary_json: self.summary_json.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    let base = match &cli.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FileConfig::default(),
    };
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let config = base
        .overlay(cli.layer())
        .into_run_config(command_line)
        .context("Invalid configuration")?;

    let ctx = RunContext::load(config).context("Failed to set up test run")?;

    let verbosity = cli.verbosity();
    let bar = progress_bar(verbosity);
    let results = TestRunner::new(&ctx)
        .on_progress(progress_callback(bar, verbosity))
        .run()
        .context("Failed to write failure report")?;

    let reporter = TerminalReporter::with_verbosity(verbosity);
    reporter.print_summary(&results);
    reporter.print_failures(&results);

    if let Some(path) = &ctx.config.summary_json {
        write_summary_json(path, &results)
            .with_context(|| format!("Failed to write summary {}", path.display()))?;
    }

    if ctx.config.fail_on_failures && !results.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr; `RUST_LOG` overrides the level picked from flags.
fn init_logging(verbosity: Verbosity) {
    let level = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(verbosity: Verbosity) -> ProgressBar {
    if verbosity == Verbosity::Quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    bar
}

fn progress_callback(bar: ProgressBar, verbosity: Verbosity) -> ProgressCallback {
    let lines = TerminalReporter::with_verbosity(verbosity);
    Box::new(move |event| match event {
        ProgressEvent::RunStarted { total_tests } => bar.set_length(total_tests as u64),
        ProgressEvent::TestStarted { name } => bar.set_message(name),
        ProgressEvent::TestCompleted { name, passed, .. } => {
            if let Some(line) = lines.test_line(&name, passed) {
                if bar.is_hidden() {
                    println!("{line}");
                } else {
                    bar.println(line);
                }
            }
            bar.inc(1);
        }
        ProgressEvent::TestSkipped { name, reason } => debug!("Skipping {} ({})", name, reason),
        ProgressEvent::RunCompleted { .. } => bar.finish_and_clear(),
    })
}
