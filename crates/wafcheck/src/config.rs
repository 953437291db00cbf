//! Run configuration.
//!
//! Settings come from an optional YAML file and the command line. Both are
//! decoded into a [`FileConfig`] layer; the command-line layer is laid over
//! the file layer and the result is resolved into a [`RunConfig`].

use crate::error::SetupError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Format of per-failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Html,
    Text,
}

impl ReportFormat {
    /// File extension for reports in this format.
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Text => "txt",
        }
    }
}

/// One layer of settings, as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub input: Option<PathBuf>,
    /// Ruleset files; entries may be comma-separated lists or globs.
    pub rules: Vec<String>,
    pub output: Option<PathBuf>,
    pub report_format: Option<ReportFormat>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    /// Test names that are always skipped.
    pub exceptions: Vec<String>,
    pub ignore: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub fail_on_failures: Option<bool>,
    pub summary_json: Option<PathBuf>,
}

impl FileConfig {
    /// Reads a YAML config file.
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let content = std::fs::read_to_string(path).map_err(|source| SetupError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_yaml::from_str(&content).map_err(|e| SetupError::ConfigDecode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Lays `top` over `self`. Values set in `top` win, except exceptions,
    /// which are merged from both layers. Include and exclude share one
    /// slot: a pattern of either kind in `top` replaces both of `self`'s.
    pub fn overlay(self, top: FileConfig) -> FileConfig {
        let (include, exclude) = if top.include.is_some() || top.exclude.is_some() {
            (top.include, top.exclude)
        } else {
            (self.include, self.exclude)
        };

        let mut exceptions = self.exceptions;
        for name in top.exceptions {
            if !exceptions.contains(&name) {
                exceptions.push(name);
            }
        }

        FileConfig {
            input: top.input.or(self.input),
            rules: if top.rules.is_empty() {
                self.rules
            } else {
                top.rules
            },
            output: top.output.or(self.output),
            report_format: top.report_format.or(self.report_format),
            include,
            exclude,
            exceptions,
            ignore: top.ignore.or(self.ignore),
            timeout_secs: top.timeout_secs.or(self.timeout_secs),
            fail_on_failures: top.fail_on_failures.or(self.fail_on_failures),
            summary_json: top.summary_json.or(self.summary_json),
        }
    }

    /// Validates the merged settings and expands ruleset patterns.
    pub fn into_run_config(self, command_line: String) -> Result<RunConfig, SetupError> {
        let input = self.input.ok_or(SetupError::NoInput)?;
        if self.rules.is_empty() {
            return Err(SetupError::NoRules);
        }
        if self.include.is_some() && self.exclude.is_some() {
            return Err(SetupError::ConflictingPatterns);
        }

        Ok(RunConfig {
            input,
            rules: expand_rule_sources(&self.rules)?,
            output: self.output,
            report_format: self.report_format.unwrap_or_default(),
            include: self.include,
            exclude: self.exclude,
            exceptions: self.exceptions,
            ignore: self.ignore,
            timeout: self.timeout_secs.map(Duration::from_secs),
            fail_on_failures: self.fail_on_failures.unwrap_or(false),
            summary_json: self.summary_json,
            command_line,
        })
    }
}

/// Resolved configuration for a run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Root directory scanned for profiles.
    pub input: PathBuf,

    /// Ruleset files, in load order.
    pub rules: Vec<PathBuf>,

    /// Directory for per-failure reports. Detailed reporting is off when unset.
    pub output: Option<PathBuf>,

    pub report_format: ReportFormat,

    /// Only run tests whose name matches.
    pub include: Option<String>,

    /// Skip tests whose name matches.
    pub exclude: Option<String>,

    /// Test names that are always skipped and reported as excluded.
    pub exceptions: Vec<String>,

    /// Ignore-list document.
    pub ignore: Option<PathBuf>,

    /// Per-test execution limit.
    pub timeout: Option<Duration>,

    /// Exit non-zero when any admitted test fails.
    pub fail_on_failures: bool,

    /// Where to write the JSON run summary.
    pub summary_json: Option<PathBuf>,

    /// Invocation shown at the top of failure reports.
    pub command_line: String,
}

impl RunConfig {
    /// Creates a configuration with defaults for everything but the inputs.
    pub fn new(input: impl Into<PathBuf>, rules: Vec<PathBuf>) -> Self {
        Self {
            input: input.into(),
            rules,
            ..Self::default()
        }
    }

    /// Sets the report directory.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_report_format(mut self, format: ReportFormat) -> Self {
        self.report_format = format;
        self
    }

    /// Sets the include pattern.
    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.include = Some(pattern.into());
        self
    }

    /// Sets the exclude pattern.
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }

    /// Adds an exception-list entry.
    pub fn with_exception(mut self, name: impl Into<String>) -> Self {
        self.exceptions.push(name.into());
        self
    }

    pub fn with_ignore(mut self, path: impl Into<PathBuf>) -> Self {
        self.ignore = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = command_line.into();
        self
    }
}

/// Expands ruleset arguments into file paths.
///
/// Each entry may hold several comma-separated items. Items containing glob
/// metacharacters are expanded and sorted; other items are kept verbatim so
/// a missing file is reported when the ruleset loads. Overall order follows
/// the arguments.
pub fn expand_rule_sources(specs: &[String]) -> Result<Vec<PathBuf>, SetupError> {
    let mut sources = Vec::new();

    for item in specs
        .iter()
        .flat_map(|spec| spec.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
    {
        if !item.contains(['*', '?', '[']) {
            sources.push(PathBuf::from(item));
            continue;
        }

        let paths = glob::glob(item).map_err(|e| SetupError::Glob {
            pattern: item.to_string(),
            message: e.to_string(),
        })?;
        let mut matched = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| SetupError::Glob {
                pattern: item.to_string(),
                message: e.to_string(),
            })?;
            matched.push(path);
        }
        if matched.is_empty() {
            return Err(SetupError::NoRulesMatched(item.to_string()));
        }
        matched.sort();
        sources.extend(matched);
    }

    if sources.is_empty() {
        return Err(SetupError::NoRules);
    }
    Ok(sources)
}
