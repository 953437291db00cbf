//! Per-test log capture.

/// Collects the log output of one transaction.
///
/// A sink is handed to every `run_phase` call for a single test and drained
/// afterwards, so nothing carries over between tests.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    error_lines: Vec<String>,
    debug_lines: Vec<String>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a matched-rule error log line.
    pub fn error(&mut self, line: impl Into<String>) {
        self.error_lines.push(line.into());
    }

    /// Records an engine debug line.
    pub fn debug(&mut self, line: impl Into<String>) {
        self.debug_lines.push(line.into());
    }

    pub fn error_lines(&self) -> &[String] {
        &self.error_lines
    }

    pub fn debug_lines(&self) -> &[String] {
        &self.debug_lines
    }

    /// Returns true if any error log line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.error_lines.iter().any(|l| l.contains(needle))
    }

    /// Consumes the sink, returning `(error_lines, debug_lines)`.
    pub fn drain(self) -> (Vec<String>, Vec<String>) {
        (self.error_lines, self.debug_lines)
    }
}
