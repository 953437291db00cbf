//! Expected-outcome predicates attached to a test stage.
//!
//! The vocabulary here is owned by the engine: the runner deserializes it from
//! profiles and hands it back to [`crate::Transaction::output_errors`] without
//! interpreting it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A body given either as one string or as a list of lines joined with CRLF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Lines(Vec<String>),
}

impl Payload {
    /// Returns the payload bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Lines(lines) => lines.join("\r\n").into_bytes(),
        }
    }
}

/// Expected HTTP status, either a single code or any of several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusExpectation {
    One(u16),
    AnyOf(Vec<u16>),
}

impl StatusExpectation {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            StatusExpectation::One(code) => *code == status,
            StatusExpectation::AnyOf(codes) => codes.is_empty() || codes.contains(&status),
        }
    }
}

/// Declarative pass/fail predicate for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    /// Status the transaction must end with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusExpectation>,

    /// Substring that must appear in the error log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_contains: Option<String>,

    /// Substring that must not appear in the error log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_log_contains: Option<String>,

    /// Rule IDs that must match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggered_rules: Vec<u64>,

    /// Rule IDs that must not match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_triggered_rules: Vec<u64>,

    /// The engine is expected to fail evaluating this stage.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expect_error: bool,

    /// Response headers fed to the engine.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Response body fed to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accepts_single_and_list() {
        let single: StatusExpectation = serde_yaml::from_str("403").unwrap();
        assert!(single.accepts(403));
        assert!(!single.accepts(200));

        let list: StatusExpectation = serde_yaml::from_str("[200, 404]").unwrap();
        assert!(list.accepts(404));
        assert!(!list.accepts(403));
    }

    #[test]
    fn test_payload_lines_join_with_crlf() {
        let payload: Payload = serde_yaml::from_str("- a=b\n- c=d\n").unwrap();
        assert_eq!(payload.to_bytes(), b"a=b\r\nc=d".to_vec());
    }

    #[test]
    fn test_expected_output_defaults() {
        let out: ExpectedOutput = serde_yaml::from_str("log_contains: 'id \"1\"'").unwrap();
        assert_eq!(out.log_contains.as_deref(), Some("id \"1\""));
        assert!(out.triggered_rules.is_empty());
        assert!(!out.expect_error);
        assert!(out.status.is_none());
    }
}
