//! The transaction half of the engine interface.

use crate::error::EvalError;
use crate::expected::{ExpectedOutput, StatusExpectation};
use crate::phase::{Phase, PhaseOutcome};
use crate::sink::LogSink;

/// Request line of the synthesized request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub uri: String,
    pub version: String,
}

impl RequestLine {
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: version.into(),
        }
    }
}

/// A rule (or rule chain) that matched during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    /// ID of the chain head.
    pub rule_id: u64,
    pub phase: Phase,
    pub message: String,
    /// `VARIABLE:key: value` of the last link that matched.
    pub matched_data: String,
}

/// A disruptive decision taken by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    pub rule_id: u64,
    pub status: u16,
    pub action: String,
    pub phase: Phase,
}

/// One entry of the transaction's variable collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableEntry {
    pub collection: String,
    pub key: String,
    pub value: String,
}

/// One request/response exchange evaluated against a ruleset.
///
/// Data is attached in message order (request headers, request body,
/// response headers, response body) and phases are then run one at a time.
pub trait Transaction: Send {
    /// Unique ID used in log lines.
    fn id(&self) -> &str;

    fn process_connection(
        &mut self,
        client_addr: &str,
        client_port: u16,
        server_addr: &str,
        server_port: u16,
    );

    fn add_request_headers(&mut self, line: &RequestLine, headers: &[(String, String)]);

    fn append_request_body(&mut self, body: &[u8]);

    fn add_response_headers(&mut self, status: u16, protocol: &str, headers: &[(String, String)]);

    fn append_response_body(&mut self, body: &[u8]);

    /// Evaluates the rules of one phase, writing log output to `sink`.
    fn run_phase(&mut self, phase: Phase, sink: &mut LogSink) -> Result<PhaseOutcome, EvalError>;

    fn matched_rules(&self) -> &[MatchedRule];

    fn interruption(&self) -> Option<&Interruption>;

    /// Status the client would observe: the interruption status, or the
    /// response status when nothing interrupted.
    fn final_status(&self) -> u16;

    /// Snapshot of every populated variable.
    fn variables(&self) -> Vec<VariableEntry>;

    fn is_rule_matched(&self, id: u64) -> bool {
        self.matched_rules().iter().any(|m| m.rule_id == id)
    }

    /// Lists every way the observed outcome differs from `expected`.
    ///
    /// An empty list means the stage passed.
    fn output_errors(&self, expected: &ExpectedOutput, sink: &LogSink) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(needle) = expected.log_contains.as_deref()
            && !sink.contains(needle)
        {
            errors.push(format!("Expected log to contain '{needle}'"));
        }

        if let Some(needle) = expected.no_log_contains.as_deref()
            && sink.contains(needle)
        {
            errors.push(format!("Expected log to not contain '{needle}'"));
        }

        for id in &expected.triggered_rules {
            if !self.is_rule_matched(*id) {
                errors.push(format!("Expected rule {id} to be triggered"));
            }
        }

        for id in &expected.non_triggered_rules {
            if self.is_rule_matched(*id) {
                errors.push(format!("Expected rule {id} to not be triggered"));
            }
        }

        if let Some(status) = &expected.status {
            let actual = self.final_status();
            if !status.accepts(actual) {
                let wanted = match status {
                    StatusExpectation::One(code) => code.to_string(),
                    StatusExpectation::AnyOf(codes) => format!("{codes:?}"),
                };
                errors.push(format!("Expected status {wanted}, got {actual}"));
            }
        }

        errors
    }
}
