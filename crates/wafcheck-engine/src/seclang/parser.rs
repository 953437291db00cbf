//! Directive parsing for the supported SecLang subset.

use super::operator::OperatorSpec;
use super::transform::Transformation;
use super::variables::VariableSelector;
use super::{Condition, Disruptive, EngineMode};
use crate::error::ParseError;
use crate::phase::Phase;
use crate::rule::RuleDefinition;
use std::collections::HashSet;

/// Result of parsing one or more sources.
#[derive(Debug, Default)]
pub struct ParsedRuleset {
    pub mode: Option<EngineMode>,
    pub rules: Vec<RuleDefinition>,
}

/// A directive after continuation lines have been joined.
struct LogicalLine {
    line: usize,
    raw: String,
    joined: String,
}

/// Parsed action list of one rule.
#[derive(Debug, Default)]
struct ActionSet {
    id: Option<u64>,
    phase: Option<Phase>,
    message: Option<String>,
    severity: Option<String>,
    logdata: Option<String>,
    chain: bool,
    disruptive: Option<Disruptive>,
    status: Option<u16>,
    log: Option<bool>,
    transforms: Vec<Transformation>,
}

/// Incremental parser; keeps state across files so IDs stay unique and
/// chains cannot span sources.
#[derive(Default)]
pub struct Parser {
    out: ParsedRuleset,
    seen_ids: HashSet<u64>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> ParsedRuleset {
        self.out
    }

    /// Parses one source. `file` is used in errors and log lines.
    pub fn parse_source(&mut self, source: &str, file: &str) -> Result<(), ParseError> {
        let mut pending: Vec<RuleDefinition> = Vec::new();

        for logical in logical_lines(source) {
            let trimmed = logical.joined.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let err = |message: String| ParseError::syntax(file, logical.line, message);

            let tokens = tokenize(trimmed).map_err(err)?;
            let directive = tokens[0].to_ascii_lowercase();
            let args = &tokens[1..];

            match directive.as_str() {
                "secruleengine" => {
                    let [value] = args else {
                        return Err(err("SecRuleEngine expects one argument".to_string()));
                    };
                    let mode = EngineMode::parse(value)
                        .ok_or_else(|| err(format!("unknown SecRuleEngine value '{value}'")))?;
                    self.out.mode = Some(mode);
                }
                "secrule" => {
                    let (vars, op, actions) = match args {
                        [vars, op] => (vars.as_str(), op.as_str(), ""),
                        [vars, op, actions] => (vars.as_str(), op.as_str(), actions.as_str()),
                        _ => {
                            return Err(err(
                                "SecRule expects VARIABLES OPERATOR [ACTIONS]".to_string(),
                            ));
                        }
                    };
                    let variables = vars
                        .split('|')
                        .map(|v| VariableSelector::parse(v.trim()))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(err)?;
                    let operator = OperatorSpec::parse(op).map_err(err)?;
                    let actions = parse_actions(actions).map_err(err)?;
                    let rule = build_rule(variables, operator, actions, &logical, file, &pending)
                        .map_err(err)?;
                    self.push_link(rule, &mut pending, file)?;
                }
                "secaction" => {
                    let [actions] = args else {
                        return Err(err("SecAction expects one argument".to_string()));
                    };
                    let actions = parse_actions(actions).map_err(err)?;
                    let operator = OperatorSpec::parse("@unconditionalMatch").map_err(err)?;
                    let rule = build_rule(Vec::new(), operator, actions, &logical, file, &pending)
                        .map_err(err)?;
                    self.push_link(rule, &mut pending, file)?;
                }
                _ => return Err(err(format!("unsupported directive '{}'", tokens[0]))),
            }
        }

        if let Some(head) = pending.first() {
            return Err(ParseError::syntax(
                file,
                head.line,
                "chain was never completed",
            ));
        }
        Ok(())
    }

    fn push_link(
        &mut self,
        rule: (RuleDefinition, bool),
        pending: &mut Vec<RuleDefinition>,
        file: &str,
    ) -> Result<(), ParseError> {
        let (rule, continues) = rule;
        pending.push(rule);
        if continues {
            return Ok(());
        }

        let links = std::mem::take(pending);
        let Some(head) = fold_chain(links) else {
            return Ok(());
        };
        if !self.seen_ids.insert(head.id) {
            return Err(ParseError::syntax(
                file,
                head.line,
                format!("duplicate rule id {}", head.id),
            ));
        }
        self.out.rules.push(head);
        Ok(())
    }
}

/// Builds a rule link. The bool is true when the rule starts or continues a
/// chain.
fn build_rule(
    variables: Vec<VariableSelector>,
    operator: OperatorSpec,
    actions: ActionSet,
    logical: &LogicalLine,
    file: &str,
    pending: &[RuleDefinition],
) -> Result<(RuleDefinition, bool), String> {
    let head = pending.first();
    let (id, phase) = match head {
        Some(head) => {
            if actions.id.is_some() {
                return Err("chained rules cannot declare an id".to_string());
            }
            (head.id, head.phase)
        }
        None => {
            let id = actions.id.ok_or("rule is missing an id")?;
            (id, actions.phase.unwrap_or(Phase::RequestBody))
        }
    };

    let condition = Condition {
        variables,
        operator,
        transforms: actions.transforms,
        disruptive: actions.disruptive.unwrap_or(Disruptive::Pass),
        status: actions.status,
        log: actions.log.unwrap_or(true),
        logdata: actions.logdata,
    };

    let rule = RuleDefinition {
        id,
        phase,
        source_text: logical.raw.clone(),
        file: file.to_string(),
        line: logical.line,
        message: actions.message.unwrap_or_default(),
        severity: actions.severity,
        chain: None,
        condition,
    };
    Ok((rule, actions.chain))
}

/// Nests links so each one owns the next; returns the head.
fn fold_chain(links: Vec<RuleDefinition>) -> Option<RuleDefinition> {
    let mut links = links.into_iter().rev();
    let mut current = links.next()?;
    for mut link in links {
        link.chain = Some(Box::new(current));
        current = link;
    }
    Some(current)
}

/// Joins backslash-continued lines. `raw` keeps the original text.
fn logical_lines(source: &str) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut raw: Vec<&str> = Vec::new();
    let mut joined = String::new();
    let mut start = 0;

    for (idx, line) in source.lines().enumerate() {
        let line = line.trim_end();
        if raw.is_empty() {
            start = idx + 1;
        }
        raw.push(line);
        match line.strip_suffix('\\') {
            Some(head) => {
                joined.push_str(head);
                joined.push(' ');
            }
            None => {
                joined.push_str(line);
                out.push(LogicalLine {
                    line: start,
                    raw: raw.join("\n"),
                    joined: std::mem::take(&mut joined),
                });
                raw.clear();
            }
        }
    }
    if !raw.is_empty() {
        out.push(LogicalLine {
            line: start,
            raw: raw.join("\n"),
            joined,
        });
    }
    out
}

/// Splits a directive into whitespace-separated, optionally double-quoted
/// arguments. `\"` inside quotes is an escaped quote; other backslashes are
/// kept for the regex engine.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' if chars.peek() == Some(&'"') => {
                        token.push('"');
                        chars.next();
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => token.push(c),
                }
            }
            if !closed {
                return Err("unterminated quoted argument".to_string());
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    if tokens.is_empty() {
        return Err("empty directive".to_string());
    }
    Ok(tokens)
}

/// Splits `id:1,msg:'a, b',deny` on commas outside single quotes.
fn split_actions(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in raw.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_actions(raw: &str) -> Result<ActionSet, String> {
    let mut set = ActionSet::default();

    for action in split_actions(raw) {
        let (name, value) = match action.split_once(':') {
            Some((name, value)) => (name.trim(), Some(unquote(value.trim()))),
            None => (action.as_str(), None),
        };
        let required = || value.clone().ok_or_else(|| format!("action '{name}' needs a value"));

        match name.to_ascii_lowercase().as_str() {
            "id" => {
                let raw = required()?;
                let id = raw
                    .parse::<u64>()
                    .map_err(|_| format!("invalid rule id '{raw}'"))?;
                set.id = Some(id);
            }
            "phase" => {
                let raw = required()?;
                set.phase = Some(Phase::from_action(&raw).ok_or(format!("invalid phase '{raw}'"))?);
            }
            "msg" => set.message = Some(required()?),
            "severity" => set.severity = Some(required()?),
            "logdata" => set.logdata = Some(required()?),
            "status" => {
                let raw = required()?;
                set.status = Some(
                    raw.parse::<u16>()
                        .map_err(|_| format!("invalid status '{raw}'"))?,
                );
            }
            "t" => {
                let raw = required()?;
                match Transformation::parse(&raw)? {
                    Some(t) => set.transforms.push(t),
                    None => set.transforms.clear(),
                }
            }
            "chain" => set.chain = true,
            "deny" => set.disruptive = Some(Disruptive::Deny),
            "drop" => set.disruptive = Some(Disruptive::Drop),
            "block" => set.disruptive = Some(Disruptive::Block),
            "pass" => set.disruptive = Some(Disruptive::Pass),
            "log" => set.log = Some(true),
            "nolog" => set.log = Some(false),
            // Accepted for compatibility; they do not affect evaluation here.
            "tag" | "rev" | "ver" | "maturity" | "accuracy" | "auditlog" | "noauditlog"
            | "capture" => {}
            other => return Err(format!("unsupported action '{other}'")),
        }
    }

    Ok(set)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
        .to_string()
}
