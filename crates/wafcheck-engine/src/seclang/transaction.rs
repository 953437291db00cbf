//! Transaction evaluation for the SecLang engine.

use super::transform::apply_all;
use super::variables::{Collection, TransactionData};
use super::{EngineMode, Ruleset};
use crate::error::EvalError;
use crate::phase::{Phase, PhaseOutcome};
use crate::rule::RuleDefinition;
use crate::sink::LogSink;
use crate::transaction::{Interruption, MatchedRule, RequestLine, Transaction, VariableEntry};
use std::sync::Arc;

const DEFAULT_DENY_STATUS: u16 = 403;
const DEFAULT_RESPONSE_STATUS: u16 = 200;

/// State of one request/response exchange against a [`Ruleset`].
pub struct SecLangTransaction {
    ruleset: Arc<Ruleset>,
    id: String,
    data: TransactionData,
    matched: Vec<MatchedRule>,
    interruption: Option<Interruption>,
    last_phase: Option<Phase>,
}

impl SecLangTransaction {
    pub(crate) fn new(ruleset: Arc<Ruleset>, id: String) -> Self {
        Self {
            ruleset,
            id,
            data: TransactionData::default(),
            matched: Vec::new(),
            interruption: None,
            last_phase: None,
        }
    }

    /// Evaluates one link; returns `VARIABLE: value` of the first match.
    fn evaluate_link(&self, link: &RuleDefinition) -> Option<String> {
        let condition = &link.condition;
        if condition.variables.is_empty() {
            return condition.operator.matches("").then(String::new);
        }
        for selector in &condition.variables {
            for (name, value) in self.data.resolve(selector) {
                let value = apply_all(&condition.transforms, &value);
                if condition.operator.matches(&value) {
                    return Some(format!("{name}: {value}"));
                }
            }
        }
        None
    }

    /// A chain matches only when every link matches.
    fn evaluate_chain(&self, rule: &RuleDefinition, sink: &mut LogSink) -> Option<String> {
        let mut matched = String::new();
        for link in rule.chain_iter() {
            match self.evaluate_link(link) {
                Some(data) => matched = data,
                None => {
                    sink.debug(format!(
                        "[{}] rule {} link at line {} did not match",
                        self.id, rule.id, link.line
                    ));
                    return None;
                }
            }
        }
        Some(matched)
    }

    fn record_match(&mut self, rule: &RuleDefinition, phase: Phase, data: String, sink: &mut LogSink) {
        let condition = &rule.condition;
        let disrupts = condition.disruptive.interrupts()
            && self.ruleset.mode == EngineMode::On
            && self.interruption.is_none();
        let status = condition.status.unwrap_or(DEFAULT_DENY_STATUS);

        if disrupts {
            self.interruption = Some(Interruption {
                rule_id: rule.id,
                status,
                action: condition.disruptive.name().to_string(),
                phase,
            });
        }

        if condition.log {
            let logdata = condition.logdata.as_deref().unwrap_or(&data);
            sink.error(self.error_log(rule, phase, logdata, disrupts.then_some(status)));
        }
        sink.debug(format!(
            "[{}] rule {} matched in phase {} ({})",
            self.id,
            rule.id,
            phase.number(),
            data
        ));

        self.matched.push(MatchedRule {
            rule_id: rule.id,
            phase,
            message: rule.message.clone(),
            matched_data: data,
        });
    }

    fn error_log(
        &self,
        rule: &RuleDefinition,
        phase: Phase,
        data: &str,
        denied_with: Option<u16>,
    ) -> String {
        let verdict = match denied_with {
            Some(code) => format!(
                "Access denied with code {code} (phase {}).",
                phase.number()
            ),
            None => "Warning.".to_string(),
        };
        format!(
            "[client \"{client}\"] wafcheck: {verdict} {msg} [file \"{file}\"] [line \"{line}\"] [id \"{id}\"] [msg \"{msg}\"] [data \"{data}\"] [severity \"{severity}\"] [uri \"{uri}\"] [unique_id \"{tx}\"]",
            client = self.data.remote_addr,
            msg = rule.message,
            file = rule.file,
            line = rule.line,
            id = rule.id,
            severity = rule.severity.as_deref().unwrap_or(""),
            uri = self.data.uri,
            tx = self.id,
        )
    }
}

impl Transaction for SecLangTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn process_connection(
        &mut self,
        client_addr: &str,
        _client_port: u16,
        server_addr: &str,
        server_port: u16,
    ) {
        self.data.remote_addr = client_addr.to_string();
        self.data.server_name = server_addr.to_string();
        self.data.server_port = server_port;
    }

    fn add_request_headers(&mut self, line: &RequestLine, headers: &[(String, String)]) {
        self.data.method.clone_from(&line.method);
        self.data.uri.clone_from(&line.uri);
        self.data.protocol.clone_from(&line.version);
        self.data.request_headers.extend_from_slice(headers);
    }

    fn append_request_body(&mut self, body: &[u8]) {
        self.data.request_body.extend_from_slice(body);
    }

    fn add_response_headers(&mut self, status: u16, protocol: &str, headers: &[(String, String)]) {
        self.data.response_status = status;
        self.data.response_protocol = protocol.to_string();
        self.data.response_headers.extend_from_slice(headers);
    }

    fn append_response_body(&mut self, body: &[u8]) {
        self.data.response_body.extend_from_slice(body);
    }

    fn run_phase(&mut self, phase: Phase, sink: &mut LogSink) -> Result<PhaseOutcome, EvalError> {
        if let Some(last) = self.last_phase
            && phase <= last
        {
            return Err(EvalError::OutOfOrder {
                phase: phase.to_string(),
                message: format!("phase {last} already ran"),
            });
        }
        self.last_phase = Some(phase);

        if self.interruption.is_some() && phase != Phase::Logging {
            sink.debug(format!(
                "[{}] skipping phase {} after interruption",
                self.id,
                phase.number()
            ));
            return Ok(PhaseOutcome::Skipped);
        }

        if self.ruleset.mode == EngineMode::Off {
            sink.debug(format!("[{}] rule engine is off", self.id));
            return Ok(PhaseOutcome::Ran { interrupted: false });
        }

        let ruleset = Arc::clone(&self.ruleset);
        for rule in ruleset.rules_for(phase) {
            sink.debug(format!(
                "[{}] evaluating rule {} in phase {}",
                self.id,
                rule.id,
                phase.number()
            ));
            let Some(data) = self.evaluate_chain(rule, sink) else {
                continue;
            };
            let was_interrupted = self.interruption.is_some();
            self.record_match(rule, phase, data, sink);
            if !was_interrupted && self.interruption.is_some() {
                return Ok(PhaseOutcome::Ran { interrupted: true });
            }
        }

        Ok(PhaseOutcome::Ran { interrupted: false })
    }

    fn matched_rules(&self) -> &[MatchedRule] {
        &self.matched
    }

    fn interruption(&self) -> Option<&Interruption> {
        self.interruption.as_ref()
    }

    fn final_status(&self) -> u16 {
        match &self.interruption {
            Some(interruption) => interruption.status,
            None if self.data.response_status == 0 => DEFAULT_RESPONSE_STATUS,
            None => self.data.response_status,
        }
    }

    fn variables(&self) -> Vec<VariableEntry> {
        Collection::ALL
            .into_iter()
            .flat_map(|collection| {
                self.data
                    .entries(collection)
                    .into_iter()
                    .filter(|(_, value)| !value.is_empty())
                    .map(move |(key, value)| VariableEntry {
                        collection: collection.name().to_string(),
                        key,
                        value,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::expected::{ExpectedOutput, StatusExpectation};
    use crate::{InspectionEngine, LogSink, Phase, PhaseOutcome, RequestLine, SecLangEngine};

    const RULES: &str = r#"
SecRule REQUEST_URI "@contains /admin" "id:1001,phase:1,deny,status:401,msg:'Admin access'"
SecRule ARGS "@rx (?i)union\s+select" "id:942100,phase:2,block,msg:'SQL Injection',severity:CRITICAL,chain"
    SecRule REQUEST_METHOD "@streq POST"
SecRule REQUEST_HEADERS:User-Agent "@pm nikto sqlmap" "id:913100,phase:1,pass,msg:'Scanner'"
SecRule RESPONSE_BODY "@contains stacktrace" "id:950100,phase:4,pass,nolog"
"#;

    fn engine() -> SecLangEngine {
        SecLangEngine::from_source(RULES, "rules.conf").unwrap()
    }

    fn run(
        engine: &SecLangEngine,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &str,
        response_body: &str,
    ) -> (Box<dyn crate::Transaction>, LogSink, Vec<PhaseOutcome>) {
        let mut tx = engine.new_transaction();
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        tx.process_connection("127.0.0.1", 0, "localhost", 80);
        tx.add_request_headers(&RequestLine::new(method, uri, "HTTP/1.1"), &headers);
        tx.append_request_body(body.as_bytes());
        tx.add_response_headers(200, "HTTP/1.1", &[]);
        tx.append_response_body(response_body.as_bytes());

        let mut sink = LogSink::new();
        let outcomes = Phase::ALL
            .iter()
            .map(|p| tx.run_phase(*p, &mut sink).unwrap())
            .collect();
        (tx, sink, outcomes)
    }

    #[test]
    fn test_clean_request_matches_nothing() {
        let engine = engine();
        let (tx, sink, outcomes) = run(&engine, "GET", "/index.html", &[], "", "");
        assert!(tx.matched_rules().is_empty());
        assert!(tx.interruption().is_none());
        assert_eq!(tx.final_status(), 200);
        assert!(sink.error_lines().is_empty());
        assert!(outcomes.iter().all(|o| o.ran()));
    }

    #[test]
    fn test_deny_in_phase_one_skips_later_phases_but_logging() {
        let engine = engine();
        let (tx, sink, outcomes) = run(&engine, "GET", "/admin", &[], "", "");
        let interruption = tx.interruption().unwrap();
        assert_eq!(interruption.rule_id, 1001);
        assert_eq!(interruption.status, 401);
        assert_eq!(tx.final_status(), 401);
        assert_eq!(
            outcomes,
            vec![
                PhaseOutcome::Ran { interrupted: true },
                PhaseOutcome::Skipped,
                PhaseOutcome::Skipped,
                PhaseOutcome::Skipped,
                PhaseOutcome::Ran { interrupted: false },
            ]
        );
        assert!(sink.error_lines()[0].contains("Access denied with code 401 (phase 1)."));
        assert!(sink.error_lines()[0].contains("[id \"1001\"]"));
    }

    #[test]
    fn test_chain_requires_every_link() {
        let engine = engine();
        let headers = [("Content-Type", "application/x-www-form-urlencoded")];

        let (tx, _, _) = run(&engine, "GET", "/?q=1+UNION+SELECT+2", &headers, "", "");
        assert!(!tx.is_rule_matched(942100));

        let (tx, sink, _) = run(&engine, "POST", "/", &headers, "q=1 union select 2", "");
        assert!(tx.is_rule_matched(942100));
        assert_eq!(tx.interruption().unwrap().action, "block");
        assert!(sink.contains("[severity \"CRITICAL\"]"));
        assert!(sink.contains("[data \"REQUEST_METHOD: POST\"]"));
    }

    #[test]
    fn test_pass_rule_matches_without_interrupting() {
        let engine = engine();
        let (tx, sink, _) = run(&engine, "GET", "/", &[("user-agent", "Nikto/2.1")], "", "");
        assert!(tx.is_rule_matched(913100));
        assert!(tx.interruption().is_none());
        assert!(sink.contains("Warning. Scanner"));
    }

    #[test]
    fn test_nolog_rule_matches_silently() {
        let engine = engine();
        let (tx, sink, _) = run(&engine, "GET", "/", &[], "", "java stacktrace here");
        assert!(tx.is_rule_matched(950100));
        assert!(sink.error_lines().is_empty());
        assert!(!sink.debug_lines().is_empty());
    }

    #[test]
    fn test_detection_only_never_interrupts() {
        let source = format!("SecRuleEngine DetectionOnly\n{RULES}");
        let engine = SecLangEngine::from_source(&source, "rules.conf").unwrap();
        let (tx, sink, outcomes) = run(&engine, "GET", "/admin", &[], "", "");
        assert!(tx.is_rule_matched(1001));
        assert!(tx.interruption().is_none());
        assert!(outcomes.iter().all(|o| o.ran()));
        assert!(sink.contains("Warning."));
    }

    #[test]
    fn test_engine_off_evaluates_nothing() {
        let source = format!("SecRuleEngine Off\n{RULES}");
        let engine = SecLangEngine::from_source(&source, "rules.conf").unwrap();
        let (tx, _, _) = run(&engine, "GET", "/admin", &[], "", "");
        assert!(tx.matched_rules().is_empty());
    }

    #[test]
    fn test_phases_must_advance() {
        let engine = engine();
        let mut tx = engine.new_transaction();
        let mut sink = LogSink::new();
        tx.run_phase(Phase::RequestBody, &mut sink).unwrap();
        let err = tx.run_phase(Phase::RequestHeaders, &mut sink).unwrap_err();
        assert!(err.to_string().contains("request-headers"));
        assert!(tx.run_phase(Phase::RequestBody, &mut sink).is_err());
    }

    #[test]
    fn test_output_errors_report_each_discrepancy() {
        let engine = engine();
        let (tx, sink, _) = run(&engine, "GET", "/admin", &[], "", "");
        let expected = ExpectedOutput {
            status: Some(StatusExpectation::One(200)),
            log_contains: Some("id \"942100\"".to_string()),
            no_log_contains: Some("id \"1001\"".to_string()),
            triggered_rules: vec![913100],
            non_triggered_rules: vec![1001],
            ..Default::default()
        };
        let errors = tx.output_errors(&expected, &sink);
        assert_eq!(
            errors,
            vec![
                "Expected log to contain 'id \"942100\"'".to_string(),
                "Expected log to not contain 'id \"1001\"'".to_string(),
                "Expected rule 913100 to be triggered".to_string(),
                "Expected rule 1001 to not be triggered".to_string(),
                "Expected status 200, got 401".to_string(),
            ]
        );
    }

    #[test]
    fn test_output_errors_empty_when_expectations_hold() {
        let engine = engine();
        let (tx, sink, _) = run(&engine, "GET", "/admin", &[], "", "");
        let expected = ExpectedOutput {
            status: Some(StatusExpectation::AnyOf(vec![401, 403])),
            log_contains: Some("id \"1001\"".to_string()),
            triggered_rules: vec![1001],
            ..Default::default()
        };
        assert!(tx.output_errors(&expected, &sink).is_empty());
    }

    #[test]
    fn test_variables_snapshot() {
        let engine = engine();
        let (tx, _, _) = run(&engine, "GET", "/search?q=shoes", &[("Host", "shop")], "", "");
        let vars = tx.variables();
        assert!(vars.iter().any(|v| v.collection == "ARGS_GET" && v.key == "q" && v.value == "shoes"));
        assert!(vars.iter().any(|v| v.collection == "REQUEST_HEADERS" && v.key == "Host"));
        assert!(vars.iter().all(|v| !v.value.is_empty()));
    }
}
