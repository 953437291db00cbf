use std::path::PathBuf;
use thiserror::Error;
use wafcheck_engine::ParseError;

/// Errors that abort a run before any test executes.
#[derive(Debug, Error)]
pub enum SetupError {
    /// No profile directory was configured.
    #[error("no input directory given (use --input or `input:` in the config file)")]
    NoInput,

    /// The profile directory is missing or not a directory.
    #[error("input directory {0} does not exist or is not a directory")]
    MissingInput(PathBuf),

    /// No ruleset sources were configured.
    #[error("no ruleset given (use --rules or `rules:` in the config file)")]
    NoRules,

    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A profile document could not be decoded.
    #[error("failed to decode profile {path}: {message}")]
    ProfileDecode { path: PathBuf, message: String },

    /// The ignore list could not be decoded.
    #[error("failed to decode ignore list {path}: {message}")]
    IgnoreDecode { path: PathBuf, message: String },

    /// The config file could not be decoded.
    #[error("failed to decode config {path}: {message}")]
    ConfigDecode { path: PathBuf, message: String },

    /// The ruleset failed to load.
    #[error("ruleset error: {0}")]
    Ruleset(#[from] ParseError),

    /// A name filter is not a valid regular expression.
    #[error("invalid {flag} pattern '{pattern}': {source}")]
    InvalidPattern {
        flag: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Both an include and an exclude pattern were configured.
    #[error("--include and --exclude cannot be used together")]
    ConflictingPatterns,

    /// A ruleset glob is malformed.
    #[error("invalid ruleset pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    /// A ruleset glob matched nothing.
    #[error("ruleset pattern '{0}' matched no files")]
    NoRulesMatched(String),
}
