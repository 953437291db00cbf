//! Reference engine for a subset of the SecLang rule language.
//!
//! Supported: `SecRule`, `SecAction`, `SecRuleEngine`, backslash
//! continuation, rule chains, a core set of variables, operators,
//! transformations and actions. Anything outside the subset is rejected at
//! load time rather than silently ignored.

mod operator;
mod parser;
mod transaction;
mod transform;
mod variables;

pub use transaction::SecLangTransaction;

use crate::engine::InspectionEngine;
use crate::error::ParseError;
use crate::phase::Phase;
use crate::rule::RuleDefinition;
use crate::transaction::Transaction;
use operator::OperatorSpec;
use parser::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use transform::Transformation;
use variables::VariableSelector;

/// `SecRuleEngine` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    #[default]
    On,
    Off,
    DetectionOnly,
}

impl EngineMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on" => Some(EngineMode::On),
            "off" => Some(EngineMode::Off),
            "detectiononly" => Some(EngineMode::DetectionOnly),
            _ => None,
        }
    }
}

/// Disruptive action of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disruptive {
    Pass,
    Deny,
    Drop,
    Block,
}

impl Disruptive {
    fn interrupts(self) -> bool {
        !matches!(self, Disruptive::Pass)
    }

    fn name(self) -> &'static str {
        match self {
            Disruptive::Pass => "pass",
            Disruptive::Deny => "deny",
            Disruptive::Drop => "drop",
            Disruptive::Block => "block",
        }
    }
}

/// What a single rule link tests and does when it matches.
#[derive(Debug, Clone)]
pub struct Condition {
    variables: Vec<VariableSelector>,
    operator: OperatorSpec,
    transforms: Vec<Transformation>,
    disruptive: Disruptive,
    status: Option<u16>,
    log: bool,
    logdata: Option<String>,
}

/// Compiled rules shared by every transaction of an engine.
#[derive(Debug)]
pub(crate) struct Ruleset {
    mode: EngineMode,
    rules: Vec<RuleDefinition>,
    by_id: HashMap<u64, usize>,
}

impl Ruleset {
    fn rules_for(&self, phase: Phase) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().filter(move |r| r.phase == phase)
    }
}

/// Engine over a loaded SecLang ruleset.
#[derive(Debug)]
pub struct SecLangEngine {
    ruleset: Arc<Ruleset>,
    next_tx: AtomicU64,
}

impl SecLangEngine {
    /// Parses rules from a string; `name` is used in errors and logs.
    pub fn from_source(source: &str, name: &str) -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        parser.parse_source(source, name)?;
        Ok(Self::from_parsed(parser.finish()))
    }

    fn from_parsed(parsed: parser::ParsedRuleset) -> Self {
        let by_id = parsed
            .rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| (rule.id, idx))
            .collect();
        Self {
            ruleset: Arc::new(Ruleset {
                mode: parsed.mode.unwrap_or_default(),
                rules: parsed.rules,
                by_id,
            }),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.ruleset.mode
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.ruleset.rules
    }
}

impl InspectionEngine for SecLangEngine {
    fn new_transaction(&self) -> Box<dyn Transaction> {
        let seq = self.next_tx.fetch_add(1, Ordering::Relaxed);
        Box::new(SecLangTransaction::new(
            Arc::clone(&self.ruleset),
            format!("tx-{seq:08}"),
        ))
    }

    fn find_rule_by_id(&self, id: u64) -> Option<&RuleDefinition> {
        self.ruleset
            .by_id
            .get(&id)
            .map(|idx| &self.ruleset.rules[*idx])
    }

    fn rule_count(&self) -> usize {
        self.ruleset.rules.len()
    }
}

/// Loads rules from the given files, in order.
///
/// Any unreadable file or syntax error fails the whole load.
pub fn load_rules<P: AsRef<Path>>(sources: &[P]) -> Result<SecLangEngine, ParseError> {
    let mut parser = Parser::new();
    for source in sources {
        let path = source.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ParseError::Io {
            path: PathBuf::from(path),
            source: e,
        })?;
        debug!("Parsing ruleset {}", path.display());
        parser.parse_source(&text, &path.display().to_string())?;
    }
    Ok(SecLangEngine::from_parsed(parser.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_rules_in_order_across_files() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.conf");
        let b = tmp.path().join("b.conf");
        fs::write(&a, "SecRule ARGS \"@rx a\" \"id:1\"\n").unwrap();
        fs::write(&b, "SecRule ARGS \"@rx b\" \"id:2\"\n").unwrap();

        let engine = load_rules(&[&b, &a]).unwrap();
        let ids: Vec<u64> = engine.rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(engine.rule_count(), 2);
        assert_eq!(engine.find_rule_by_id(1).unwrap().file, a.display().to_string());
    }

    #[test]
    fn test_duplicate_id_across_files_fails() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.conf");
        fs::write(&a, "SecRule ARGS \"@rx a\" \"id:1\"\n").unwrap();

        let err = load_rules(&[&a, &a]).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id 1"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_rules(&[tmp.path().join("nope.conf")]).unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }

    #[test]
    fn test_find_rule_by_id_unknown() {
        let engine = SecLangEngine::from_source("SecAction \"id:10\"", "inline").unwrap();
        assert!(engine.find_rule_by_id(10).is_some());
        assert!(engine.find_rule_by_id(11).is_none());
        assert_eq!(engine.mode(), EngineMode::On);
    }
}
