//! Maps engine log lines back to the rules that produced them.
//!
//! This is a diagnostic aid for reports only; nothing here affects a
//! test's verdict.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;
use wafcheck_engine::InspectionEngine;

fn id_tag() -> &'static Regex {
    static ID_TAG: OnceLock<Regex> = OnceLock::new();
    ID_TAG.get_or_init(|| Regex::new(r#"\[id "(\d+)"\]"#).expect("valid regex"))
}

fn digit_run() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"[0-9]{4,}").expect("valid regex"))
}

/// Pulls a rule ID out of a log line.
///
/// An `[id "N"]` tag wins; otherwise the last run of four or more digits
/// is used.
pub fn extract_rule_id(line: &str) -> Option<u64> {
    if let Some(caps) = id_tag().captures(line) {
        return caps[1].parse().ok();
    }
    digit_run()
        .find_iter(line)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Resolves log lines against a loaded ruleset.
pub struct RuleCorrelator<'a> {
    engine: &'a dyn InspectionEngine,
}

impl<'a> RuleCorrelator<'a> {
    pub fn new(engine: &'a dyn InspectionEngine) -> Self {
        Self { engine }
    }

    /// Source text of the rule behind `line`, chained rules included and
    /// joined with newlines. Empty when the line names no known rule.
    pub fn correlate(&self, line: &str) -> String {
        let Some(id) = extract_rule_id(line) else {
            warn!("No rule id found in log line: {}", line);
            return String::new();
        };

        let Some(rule) = self.engine.find_rule_by_id(id) else {
            warn!("Rule {} not found in the loaded ruleset", id);
            return String::new();
        };

        rule.chain_iter()
            .map(|r| r.source_text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wafcheck_engine::SecLangEngine;

    const RULES: &str = r#"SecRule ARGS "@rx select" "id:942100,phase:2,deny,chain"
    SecRule REQUEST_METHOD "@streq POST"
SecRule REQUEST_URI "@contains /admin" "id:1001,phase:1,deny"
"#;

    #[test]
    fn test_extract_prefers_id_tag() {
        let line = r#"[client "127.0.0.1"] Warning. [line "12"] [id "942100"] [unique_id "tx-00000001"]"#;
        assert_eq!(extract_rule_id(line), Some(942_100));
    }

    #[test]
    fn test_extract_falls_back_to_last_digit_run() {
        assert_eq!(extract_rule_id("matched rule id 942100"), Some(942_100));
        assert_eq!(extract_rule_id("at 2024 rule 920100"), Some(920_100));
        assert_eq!(extract_rule_id("rule 123 only"), None);
        assert_eq!(extract_rule_id("nothing"), None);
    }

    #[test]
    fn test_correlate_includes_chain() {
        let engine = SecLangEngine::from_source(RULES, "rules.conf").unwrap();
        let correlator = RuleCorrelator::new(&engine);

        let expected = format!(
            "{}\n{}",
            "SecRule ARGS \"@rx select\" \"id:942100,phase:2,deny,chain\"",
            "    SecRule REQUEST_METHOD \"@streq POST\""
        );
        assert_eq!(correlator.correlate("...rule id 942100..."), expected);
    }

    #[test]
    fn test_correlate_single_rule_from_engine_log() {
        let engine = SecLangEngine::from_source(RULES, "rules.conf").unwrap();
        let correlator = RuleCorrelator::new(&engine);
        let line = r#"[client "127.0.0.1"] wafcheck: Access denied with code 403 (phase 1). [id "1001"]"#;
        assert_eq!(
            correlator.correlate(line),
            "SecRule REQUEST_URI \"@contains /admin\" \"id:1001,phase:1,deny\""
        );
    }

    #[test]
    fn test_correlate_misses_are_empty() {
        let engine = SecLangEngine::from_source(RULES, "rules.conf").unwrap();
        let correlator = RuleCorrelator::new(&engine);
        assert_eq!(correlator.correlate("no id here"), "");
        assert_eq!(correlator.correlate("rule 999999"), "");
    }
}
