//! Test runner: from loaded profiles to aggregated results.
//!
//! The runner materializes every stage, applies the filter policy, executes
//! admitted tests one after another and writes a report for each failure.
//!
//! # Example
//!
//! ```no_run
//! use wafcheck::{RunConfig, RunContext, TestRunner};
//! use std::path::PathBuf;
//!
//! let config = RunConfig::new("profiles", vec![PathBuf::from("rules/base.conf")]);
//! let ctx = RunContext::load(config).unwrap();
//! let results = TestRunner::new(&ctx).run().unwrap();
//!
//! println!("{}", results.summary_line());
//! ```

use crate::config::RunConfig;
use crate::correlate::RuleCorrelator;
use crate::driver::ExecutionDriver;
use crate::error::SetupError;
use crate::filter::FilterPolicy;
use crate::materialize::materialize;
use crate::profile::ProfileStore;
use crate::reporter::{FailureReport, ReportError, ReportWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use wafcheck_engine::{InspectionEngine, load_rules};

/// Everything a run needs, built once and shared by reference.
pub struct RunContext {
    pub engine: Arc<dyn InspectionEngine>,
    pub store: ProfileStore,
    pub policy: FilterPolicy,
    pub config: RunConfig,
}

impl RunContext {
    pub fn new(
        engine: Arc<dyn InspectionEngine>,
        store: ProfileStore,
        policy: FilterPolicy,
        config: RunConfig,
    ) -> Self {
        Self {
            engine,
            store,
            policy,
            config,
        }
    }

    /// Loads the ignore list, the ruleset and the profiles named by `config`.
    pub fn load(config: RunConfig) -> Result<Self, SetupError> {
        let policy = FilterPolicy::from_config(&config)?;
        if config.ignore.is_some() {
            info!("Will ignore {} tests", policy.ignore_list().len());
        }

        info!("Got {} ruleset files", config.rules.len());
        let engine = load_rules(&config.rules)?;
        info!("Got {} rules", engine.rule_count());

        let store = ProfileStore::load(&config.input)?;
        info!("Opened {} profiles", store.file_count());

        Ok(Self::new(Arc::new(engine), store, policy, config))
    }
}

/// Aggregated results of a run.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
    /// Tests that passed every gate and were executed.
    pub admitted: usize,
    pub passed: usize,
    pub failed: usize,
    pub ignored: usize,
    pub excluded: usize,
    /// Stages that could not be materialized.
    pub dropped: usize,

    /// Failed test names, in execution order.
    pub failures: Vec<String>,
    /// Distinct exception-list names that were skipped.
    pub excluded_names: Vec<String>,
    pub ignored_names: Vec<String>,
    pub dropped_names: Vec<String>,

    /// Failure reports written during the run.
    pub reports: Vec<PathBuf>,

    pub duration: Duration,
}

impl RunResults {
    /// `passed / admitted × 100`; zero when nothing ran.
    pub fn percentage(&self) -> f64 {
        if self.admitted == 0 {
            return 0.0;
        }
        self.passed as f64 / self.admitted as f64 * 100.0
    }

    /// Percentage with two decimals, e.g. `70.00%`.
    pub fn percentage_display(&self) -> String {
        format!("{:.2}%", self.percentage())
    }

    /// One-line result, e.g. `7/10 (70.00% passed)`.
    pub fn summary_line(&self) -> String {
        format!(
            "{}/{} ({} passed)",
            self.passed,
            self.admitted,
            self.percentage_display()
        )
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Progress callback for run updates.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Admission finished; `total_tests` tests will execute.
    RunStarted { total_tests: usize },

    /// A test is about to execute.
    TestStarted { name: String },

    /// A test has finished.
    TestCompleted {
        name: String,
        passed: bool,
        duration: Duration,
    },

    /// A test was not executed.
    TestSkipped { name: String, reason: String },

    /// The run has finished.
    RunCompleted { results: RunResults },
}

/// Executes admitted tests sequentially.
pub struct TestRunner<'a> {
    ctx: &'a RunContext,
    on_progress: Option<ProgressCallback>,
}

impl<'a> TestRunner<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self {
            ctx,
            on_progress: None,
        }
    }

    /// Sets a callback for progress updates.
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Runs every admitted test.
    ///
    /// Only report-writing failures end the run early; test failures and
    /// dropped stages are recorded in the results.
    pub fn run(&self) -> Result<RunResults, ReportError> {
        let start = Instant::now();
        let ctx = self.ctx;

        let materialized = materialize(&ctx.store);
        let mut results = RunResults {
            dropped: materialized.dropped.len(),
            dropped_names: materialized.dropped.into_iter().map(|d| d.name).collect(),
            ..RunResults::default()
        };

        let admission = ctx.policy.partition(materialized.tests);
        results.excluded = admission.excluded;
        results.excluded_names = admission.excluded_names;
        results.ignored = admission.ignored.len();
        results.ignored_names = admission.ignored;
        results.admitted = admission.admitted.len();

        for name in &results.excluded_names {
            self.emit_progress(ProgressEvent::TestSkipped {
                name: name.clone(),
                reason: "excluded".to_string(),
            });
        }
        for name in &results.ignored_names {
            let reason = match ctx.policy.ignore_list().annotation(name) {
                Some(note) if !note.is_empty() => format!("ignored: {note}"),
                _ => "ignored".to_string(),
            };
            self.emit_progress(ProgressEvent::TestSkipped {
                name: name.clone(),
                reason,
            });
        }

        self.emit_progress(ProgressEvent::RunStarted {
            total_tests: results.admitted,
        });

        let driver =
            ExecutionDriver::new(Arc::clone(&ctx.engine)).with_timeout(ctx.config.timeout);
        let correlator = RuleCorrelator::new(ctx.engine.as_ref());
        let writer = ctx
            .config
            .output
            .as_ref()
            .map(|dir| ReportWriter::new(dir.clone(), ctx.config.report_format));

        for test in &admission.admitted {
            self.emit_progress(ProgressEvent::TestStarted {
                name: test.name.clone(),
            });

            let outcome = driver.execute(test);
            if outcome.passed() {
                results.passed += 1;
            } else {
                results.failed += 1;
                results.failures.push(test.name.clone());
                for error in &outcome.errors {
                    debug!("{}: {}", test.name, error);
                }

                if let Some(writer) = &writer {
                    let report = FailureReport::build(
                        &ctx.config.command_line,
                        &ctx.store,
                        test,
                        &outcome,
                        &correlator,
                    )?;
                    results.reports.push(writer.write_failure(&report)?);
                }
            }

            self.emit_progress(ProgressEvent::TestCompleted {
                name: test.name.clone(),
                passed: outcome.passed(),
                duration: outcome.duration,
            });
        }

        results.duration = start.elapsed();
        info!("{}", results.summary_line());

        self.emit_progress(ProgressEvent::RunCompleted {
            results: results.clone(),
        });

        Ok(results)
    }

    /// Emits a progress event if a callback is registered.
    fn emit_progress(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}
