//! # wafcheck-engine
//!
//! The inspection-engine interface consumed by the wafcheck runner, plus a
//! reference engine for a subset of the SecLang rule language.
//!
//! ```text
//! load_rules(sources) ──▶ SecLangEngine ──new_transaction()──▶ Transaction
//!                              │                                  │
//!                   find_rule_by_id(id)            run_phase(phase, &mut LogSink)
//! ```
//!
//! The runner only talks to the [`InspectionEngine`] and [`Transaction`]
//! traits, so any engine exposing the same lifecycle can be tested.

mod engine;
mod error;
mod expected;
mod phase;
mod rule;
pub mod seclang;
mod sink;
mod transaction;

pub use engine::InspectionEngine;
pub use error::{EvalError, ParseError};
pub use expected::{ExpectedOutput, Payload, StatusExpectation};
pub use phase::{Phase, PhaseOutcome};
pub use rule::{ChainIter, RuleDefinition};
pub use seclang::{EngineMode, SecLangEngine, load_rules};
pub use sink::LogSink;
pub use transaction::{Interruption, MatchedRule, RequestLine, Transaction, VariableEntry};
