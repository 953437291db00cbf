use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a ruleset.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Ruleset source could not be read.
    #[error("failed to read ruleset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A directive could not be parsed.
    #[error("{file}:{line}: {message}")]
    Syntax {
        file: String,
        line: usize,
        message: String,
    },
}

impl ParseError {
    pub(crate) fn syntax(file: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}

/// Errors raised while evaluating a phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// A phase was run again, or after a later phase had already run.
    #[error("phase {phase} run out of order: {message}")]
    OutOfOrder { phase: String, message: String },

    /// Engine-specific failure that aborts the transaction.
    #[error("{0}")]
    Internal(String),
}
