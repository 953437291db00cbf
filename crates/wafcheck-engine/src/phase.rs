//! Evaluation phases.

use std::fmt;

/// One stage of the fixed evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
    Logging,
}

impl Phase {
    /// All phases in evaluation order.
    pub const ALL: [Phase; 5] = [
        Phase::RequestHeaders,
        Phase::RequestBody,
        Phase::ResponseHeaders,
        Phase::ResponseBody,
        Phase::Logging,
    ];

    /// Numeric phase as written in rule actions (`phase:2`).
    pub fn number(self) -> u8 {
        match self {
            Phase::RequestHeaders => 1,
            Phase::RequestBody => 2,
            Phase::ResponseHeaders => 3,
            Phase::ResponseBody => 4,
            Phase::Logging => 5,
        }
    }

    /// Parses the value of a `phase:` action.
    pub fn from_action(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" => Some(Phase::RequestHeaders),
            "2" | "request" => Some(Phase::RequestBody),
            "3" => Some(Phase::ResponseHeaders),
            "4" | "response" => Some(Phase::ResponseBody),
            "5" | "logging" => Some(Phase::Logging),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::RequestHeaders => "request-headers",
            Phase::RequestBody => "request-body",
            Phase::ResponseHeaders => "response-headers",
            Phase::ResponseBody => "response-body",
            Phase::Logging => "logging",
        };
        write!(f, "{name}")
    }
}

/// What happened when a phase was asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Rules for the phase were evaluated.
    Ran { interrupted: bool },
    /// The phase was not evaluated because an earlier phase interrupted.
    Skipped,
}

impl PhaseOutcome {
    pub fn ran(self) -> bool {
        matches!(self, PhaseOutcome::Ran { .. })
    }
}
