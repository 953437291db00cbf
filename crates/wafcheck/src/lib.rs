//! # wafcheck
//!
//! Conformance test runner for rule-based web application firewalls.
//!
//! Profiles describe HTTP exchanges and the outcome the inspection engine is
//! expected to produce. wafcheck drives the engine through each exchange,
//! compares what happened with what was expected, and reports the result.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ ProfileStore │────▶│ materialize  │────▶│ FilterPolicy │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Reporter   │◀────│RuleCorrelator│◀────│ExecutionDriver│
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! - `profile`: profile documents and the store that loads them
//! - `materialize`: one runnable test per stage
//! - `filter`: include/exclude patterns, exception list, ignore list
//! - `driver`: per-test transaction lifecycle and verdict
//! - `correlate`: log line to rule source
//! - `runner`: orchestration and aggregated results
//! - `reporter`: terminal, HTML, text and JSON output

pub mod config;
pub mod correlate;
pub mod driver;
pub mod error;
pub mod filter;
pub mod materialize;
pub mod profile;
pub mod reporter;
pub mod runner;

pub use crate::config::{FileConfig, ReportFormat, RunConfig, expand_rule_sources};
pub use crate::correlate::{RuleCorrelator, extract_rule_id};
pub use crate::driver::{ExecutionDriver, ExecutionError, TestOutcome, TestState};
pub use crate::error::SetupError;
pub use crate::filter::{Admission, FilterDecision, FilterPolicy, IgnoreList, NamePattern};
pub use crate::materialize::{
    DroppedStage, MaterializeError, Materialized, MaterializedTest, SynthesizedRequest,
    SynthesizedResponse, TestOrigin, materialize, parse_raw_request,
};
pub use crate::profile::{
    LoadedProfile, Profile, ProfileMeta, ProfileStore, Stage, StageEntry, StageInput, TestCase,
};
pub use crate::reporter::{
    CorrelatedLine, FailureReport, HtmlReporter, JsonReporter, ReportError, ReportWriter,
    RunSummary, TerminalReporter, TextReporter, Verbosity, write_summary_json,
};
pub use crate::runner::{ProgressCallback, ProgressEvent, RunContext, RunResults, TestRunner};

/// Crate version, recorded in JSON summaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
