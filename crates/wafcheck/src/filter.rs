//! Admission gates applied to materialized tests before execution.
//!
//! Gates run in a fixed order:
//!
//! 1. name pattern (`--include` / `--exclude`): rejected tests vanish from
//!    every count
//! 2. exception list: skipped and reported as excluded
//! 3. ignore list: skipped and reported as ignored

use crate::config::RunConfig;
use crate::error::SetupError;
use crate::materialize::MaterializedTest;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// How a test was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Run,
    ExcludedByPattern,
    ExcludedByException,
    IgnoredByConfiguration,
}

/// Name pattern gate.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Include(Regex),
    Exclude(Regex),
}

impl NamePattern {
    fn admits(&self, name: &str) -> bool {
        match self {
            NamePattern::Include(re) => re.is_match(name),
            NamePattern::Exclude(re) => !re.is_match(name),
        }
    }
}

/// Persisted list of tests to leave out of the failure tally.
///
/// The document is a flat YAML mapping of test name to a free-form note;
/// only the keys matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    entries: BTreeMap<String, String>,
}

impl IgnoreList {
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let content = std::fs::read_to_string(path).map_err(|source| SetupError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|message| SetupError::IgnoreDecode {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Decodes the YAML document. An empty document is an empty list.
    pub fn parse(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let entries: Option<BTreeMap<String, Option<String>>> =
            serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        Ok(Self {
            entries: entries
                .unwrap_or_default()
                .into_iter()
                .map(|(name, note)| (name, note.unwrap_or_default()))
                .collect(),
        })
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: names
                .into_iter()
                .map(|n| (n.into(), String::new()))
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tests split by admission decision.
#[derive(Debug, Default)]
pub struct Admission {
    /// Tests to execute, in input order.
    pub admitted: Vec<MaterializedTest>,
    /// Tests caught by the exception list.
    pub excluded: usize,
    /// Distinct excluded names, in first-seen order.
    pub excluded_names: Vec<String>,
    /// Names caught by the ignore list, in input order.
    pub ignored: Vec<String>,
}

/// The three admission gates.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    pattern: Option<NamePattern>,
    exceptions: BTreeSet<String>,
    ignore: IgnoreList,
}

impl FilterPolicy {
    /// Creates a policy that admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the policy described by a run configuration, reading the
    /// ignore list from disk when one is configured.
    pub fn from_config(config: &RunConfig) -> Result<Self, SetupError> {
        let mut policy = Self::new();
        match (&config.include, &config.exclude) {
            (Some(_), Some(_)) => return Err(SetupError::ConflictingPatterns),
            (Some(include), None) => policy = policy.with_include(include)?,
            (None, Some(exclude)) => policy = policy.with_exclude(exclude)?,
            (None, None) => {}
        }
        policy = policy.with_exceptions(config.exceptions.iter().cloned());
        if let Some(path) = &config.ignore {
            policy = policy.with_ignore_list(IgnoreList::load(path)?);
        }
        Ok(policy)
    }

    pub fn with_include(mut self, pattern: &str) -> Result<Self, SetupError> {
        self.pattern = Some(NamePattern::Include(compile("include", pattern)?));
        Ok(self)
    }

    pub fn with_exclude(mut self, pattern: &str) -> Result<Self, SetupError> {
        self.pattern = Some(NamePattern::Exclude(compile("exclude", pattern)?));
        Ok(self)
    }

    pub fn with_exceptions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exceptions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_ignore_list(mut self, ignore: IgnoreList) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn ignore_list(&self) -> &IgnoreList {
        &self.ignore
    }

    /// Classifies one test name.
    pub fn decide(&self, name: &str) -> FilterDecision {
        if let Some(pattern) = &self.pattern
            && !pattern.admits(name)
        {
            return FilterDecision::ExcludedByPattern;
        }
        if self.exceptions.contains(name) {
            return FilterDecision::ExcludedByException;
        }
        if self.ignore.contains(name) {
            return FilterDecision::IgnoredByConfiguration;
        }
        FilterDecision::Run
    }

    /// Applies every gate, keeping input order.
    pub fn partition(&self, tests: Vec<MaterializedTest>) -> Admission {
        let mut out = Admission::default();
        let mut seen_excluded = HashSet::new();

        for test in tests {
            match self.decide(&test.name) {
                FilterDecision::Run => out.admitted.push(test),
                FilterDecision::ExcludedByPattern => {}
                FilterDecision::ExcludedByException => {
                    out.excluded += 1;
                    if seen_excluded.insert(test.name.clone()) {
                        out.excluded_names.push(test.name);
                    }
                }
                FilterDecision::IgnoredByConfiguration => out.ignored.push(test.name),
            }
        }

        out
    }
}

fn compile(flag: &'static str, pattern: &str) -> Result<Regex, SetupError> {
    Regex::new(pattern).map_err(|source| SetupError::InvalidPattern {
        flag,
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::{SynthesizedRequest, SynthesizedResponse, TestOrigin};
    use std::path::PathBuf;
    use wafcheck_engine::ExpectedOutput;

    fn test(name: &str) -> MaterializedTest {
        MaterializedTest {
            name: name.to_string(),
            origin: TestOrigin {
                profile: 0,
                case: 0,
                stage: 0,
                profile_path: PathBuf::from("p.yaml"),
            },
            server_addr: "127.0.0.1".to_string(),
            server_port: 80,
            request: SynthesizedRequest {
                method: "GET".to_string(),
                uri: "/".to_string(),
                version: "HTTP/1.1".to_string(),
                headers: Vec::new(),
                body: Vec::new(),
            },
            response: SynthesizedResponse {
                status: 200,
                protocol: "HTTP/1.1".to_string(),
                headers: Vec::new(),
                body: Vec::new(),
            },
            expected: ExpectedOutput::default(),
        }
    }

    fn tests(names: &[&str]) -> Vec<MaterializedTest> {
        names.iter().map(|n| test(n)).collect()
    }

    #[test]
    fn test_gate_order() {
        let policy = FilterPolicy::new()
            .with_include("^920")
            .unwrap()
            .with_exceptions(["920100-1", "930100-1"])
            .with_ignore_list(IgnoreList::from_names(["920100-1", "920100-2"]));

        assert_eq!(policy.decide("930100-1"), FilterDecision::ExcludedByPattern);
        assert_eq!(policy.decide("920100-1"), FilterDecision::ExcludedByException);
        assert_eq!(policy.decide("920100-2"), FilterDecision::IgnoredByConfiguration);
        assert_eq!(policy.decide("920100-3"), FilterDecision::Run);
    }

    #[test]
    fn test_exclude_pattern() {
        let policy = FilterPolicy::new().with_exclude("#2$").unwrap();
        assert_eq!(policy.decide("920100-1#2"), FilterDecision::ExcludedByPattern);
        assert_eq!(policy.decide("920100-1#1"), FilterDecision::Run);
    }

    #[test]
    fn test_partition_counts_add_up() {
        let policy = FilterPolicy::new()
            .with_exclude("^949")
            .unwrap()
            .with_exceptions(["b"])
            .with_ignore_list(IgnoreList::from_names(["c"]));

        let out = policy.partition(tests(&["a", "b", "c", "949110-1", "b", "d"]));
        let admitted: Vec<_> = out.admitted.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(admitted, vec!["a", "d"]);
        assert_eq!(out.excluded, 2);
        assert_eq!(out.excluded_names, vec!["b"]);
        assert_eq!(out.ignored, vec!["c"]);
        // Pattern rejects are counted nowhere.
        assert_eq!(out.admitted.len() + out.excluded + out.ignored.len(), 5);
    }

    #[test]
    fn test_from_config_rejects_conflicting_patterns() {
        let config = RunConfig::new("p", vec![])
            .with_include("a")
            .with_exclude("b");
        assert!(matches!(
            FilterPolicy::from_config(&config),
            Err(SetupError::ConflictingPatterns)
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = FilterPolicy::new().with_include("(").unwrap_err();
        assert!(err.to_string().contains("invalid include pattern"));
    }

    #[test]
    fn test_ignore_list_parse() {
        let list = IgnoreList::parse(
            "920100-1: 'known false positive'\n920100-2: ~\n'932200-3#2': environment\n",
        )
        .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.annotation("920100-1"), Some("known false positive"));
        assert_eq!(list.annotation("920100-2"), Some(""));
        assert!(list.contains("932200-3#2"));
        assert!(IgnoreList::parse("").unwrap().is_empty());
        assert!(IgnoreList::parse("- a\n- b\n").is_err());
    }
}
