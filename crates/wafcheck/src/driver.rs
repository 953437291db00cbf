//! Drives one materialized test through the engine.
//!
//! Each test moves through `Pending → Bound → Executed → {Passed, Failed}`:
//! a fresh transaction is bound to the synthesized exchange, every phase is
//! run in order, and the engine is asked for discrepancies against the
//! expected outcome.

use crate::materialize::MaterializedTest;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};
use wafcheck_engine::{
    InspectionEngine, LogSink, MatchedRule, Phase, PhaseOutcome, RequestLine, Transaction,
    VariableEntry,
};

const CLIENT_ADDR: &str = "127.0.0.1";
const CLIENT_PORT: u16 = 0;

static WORKER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Lifecycle of a test inside the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Pending,
    Bound,
    Executed,
    Passed,
    Failed,
}

/// Errors that end a single test early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The engine failed to evaluate a phase.
    #[error("phase {phase} failed: {message}")]
    Phase { phase: Phase, message: String },

    /// The test did not finish within the configured limit.
    #[error("test timed out after {after:?}")]
    Timeout { after: Duration },

    /// The worker running the test went away without reporting.
    #[error("test worker exited without a result")]
    WorkerLost,
}

/// Everything observed while running one test.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    /// `Passed` or `Failed`.
    pub state: TestState,
    pub phases_run: Vec<Phase>,
    /// Discrepancies between expected and observed behaviour.
    pub errors: Vec<String>,
    pub execution_error: Option<ExecutionError>,
    pub error_lines: Vec<String>,
    pub debug_lines: Vec<String>,
    pub matched_rules: Vec<MatchedRule>,
    pub variables: Vec<VariableEntry>,
    /// Status the client would have seen, when execution got that far.
    pub final_status: Option<u16>,
    pub duration: Duration,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.state == TestState::Passed
    }
}

/// What a finished execution hands back to the driver.
struct Execution {
    tx: Box<dyn Transaction>,
    sink: LogSink,
    phases_run: Vec<Phase>,
    phase_error: Option<ExecutionError>,
}

/// Runs tests one at a time against a shared engine.
pub struct ExecutionDriver {
    engine: Arc<dyn InspectionEngine>,
    timeout: Option<Duration>,
}

impl ExecutionDriver {
    pub fn new(engine: Arc<dyn InspectionEngine>) -> Self {
        Self {
            engine,
            timeout: None,
        }
    }

    /// Limits how long a single test may run.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executes one test and computes its verdict.
    pub fn execute(&self, test: &MaterializedTest) -> TestOutcome {
        let start = Instant::now();
        debug!("Running {} ({:?})", test.name, TestState::Pending);

        let execution = match self.timeout {
            None => Ok(execute_test(self.engine.as_ref(), test)),
            Some(limit) => self.execute_with_timeout(test, limit),
        };

        let outcome = match execution {
            Ok(execution) => verdict(test, execution, start.elapsed()),
            Err(error) => TestOutcome {
                name: test.name.clone(),
                state: TestState::Failed,
                phases_run: Vec::new(),
                errors: vec![error.to_string()],
                execution_error: Some(error),
                error_lines: Vec::new(),
                debug_lines: Vec::new(),
                matched_rules: Vec::new(),
                variables: Vec::new(),
                final_status: None,
                duration: start.elapsed(),
            },
        };

        debug!(
            "{} finished: {:?} in {:?}",
            outcome.name, outcome.state, outcome.duration
        );
        outcome
    }

    /// Runs the test on a worker thread and waits at most `limit`.
    ///
    /// A worker that overruns is abandoned; its transaction is never used.
    fn execute_with_timeout(
        &self,
        test: &MaterializedTest,
        limit: Duration,
    ) -> Result<Execution, ExecutionError> {
        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let owned = test.clone();

        let spawned = std::thread::Builder::new()
            .name(format!(
                "wafcheck-worker-{}",
                WORKER_SEQ.fetch_add(1, Ordering::Relaxed)
            ))
            .spawn(move || {
                let _ = tx.send(execute_test(engine.as_ref(), &owned));
            });
        if spawned.is_err() {
            return Err(ExecutionError::WorkerLost);
        }

        match rx.recv_timeout(limit) {
            Ok(execution) => Ok(execution),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout { after: limit }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutionError::WorkerLost),
        }
    }
}

/// Binds a fresh transaction to the test's exchange and runs every phase.
fn execute_test(engine: &dyn InspectionEngine, test: &MaterializedTest) -> Execution {
    let mut tx = engine.new_transaction();
    let request = &test.request;
    let response = &test.response;

    tx.process_connection(CLIENT_ADDR, CLIENT_PORT, &test.server_addr, test.server_port);
    tx.add_request_headers(
        &RequestLine::new(&request.method, &request.uri, &request.version),
        &request.headers,
    );
    tx.append_request_body(&request.body);
    tx.add_response_headers(response.status, &response.protocol, &response.headers);
    tx.append_response_body(&response.body);
    trace!("{} {:?}", test.name, TestState::Bound);

    let mut sink = LogSink::new();
    let mut phases_run = Vec::new();
    let mut phase_error = None;

    for phase in Phase::ALL {
        match tx.run_phase(phase, &mut sink) {
            Ok(PhaseOutcome::Ran { interrupted }) => {
                phases_run.push(phase);
                if interrupted {
                    debug!("{} interrupted in phase {}", test.name, phase);
                }
            }
            Ok(PhaseOutcome::Skipped) => {}
            Err(e) => {
                phase_error = Some(ExecutionError::Phase {
                    phase,
                    message: e.to_string(),
                });
                break;
            }
        }
    }
    trace!("{} {:?}", test.name, TestState::Executed);

    Execution {
        tx,
        sink,
        phases_run,
        phase_error,
    }
}

fn verdict(test: &MaterializedTest, execution: Execution, duration: Duration) -> TestOutcome {
    let Execution {
        tx,
        sink,
        phases_run,
        phase_error,
    } = execution;

    let mut errors = tx.output_errors(&test.expected, &sink);
    match (&phase_error, test.expected.expect_error) {
        (Some(error), false) => errors.push(error.to_string()),
        (None, true) => errors.push("Expected an evaluation error, but none occurred".to_string()),
        _ => {}
    }

    let state = if errors.is_empty() {
        TestState::Passed
    } else {
        TestState::Failed
    };

    let final_status = tx.final_status();
    let matched_rules = tx.matched_rules().to_vec();
    let variables = tx.variables();
    let (error_lines, debug_lines) = sink.drain();

    TestOutcome {
        name: test.name.clone(),
        state,
        phases_run,
        errors,
        execution_error: phase_error,
        error_lines,
        debug_lines,
        matched_rules,
        variables,
        final_status: Some(final_status),
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::{TestOrigin, materialize_stage};
    use crate::profile::Stage;
    use std::path::PathBuf;
    use wafcheck_engine::{EvalError, ExpectedOutput, Interruption, RuleDefinition, SecLangEngine};

    const RULES: &str = r#"
SecRule REQUEST_URI "@contains /etc/passwd" "id:930120,phase:1,deny,status:403,msg:'OS file access'"
SecRule REQUEST_HEADERS:User-Agent "@pm nikto" "id:913100,phase:1,pass,msg:'Scanner'"
"#;

    fn engine() -> Arc<dyn InspectionEngine> {
        Arc::new(SecLangEngine::from_source(RULES, "rules.conf").unwrap())
    }

    fn test_from(yaml: &str) -> MaterializedTest {
        let stage: Stage = serde_yaml::from_str(yaml).unwrap();
        let origin = TestOrigin {
            profile: 0,
            case: 0,
            stage: 0,
            profile_path: PathBuf::from("p.yaml"),
        };
        materialize_stage("t-1".to_string(), origin, &stage).unwrap()
    }

    #[test]
    fn test_clean_request_passes() {
        let driver = ExecutionDriver::new(engine());
        let test = test_from("input: {uri: /}\noutput: {non_triggered_rules: [930120], status: 200}\n");

        let outcome = driver.execute(&test);
        assert!(outcome.passed(), "{:?}", outcome.errors);
        assert_eq!(outcome.phases_run, Phase::ALL.to_vec());
        assert_eq!(outcome.final_status, Some(200));
        assert!(outcome.error_lines.is_empty());
    }

    #[test]
    fn test_interruption_records_only_phases_that_ran() {
        let driver = ExecutionDriver::new(engine());
        let test = test_from(
            "input: {uri: /?f=/etc/passwd}\noutput: {triggered_rules: [930120], status: 403}\n",
        );

        let outcome = driver.execute(&test);
        assert!(outcome.passed(), "{:?}", outcome.errors);
        assert_eq!(
            outcome.phases_run,
            vec![Phase::RequestHeaders, Phase::Logging]
        );
        assert_eq!(outcome.matched_rules[0].rule_id, 930120);
        assert!(outcome.error_lines[0].contains("[id \"930120\"]"));
    }

    #[test]
    fn test_discrepancies_fail_the_test() {
        let driver = ExecutionDriver::new(engine());
        let test = test_from(
            "input: {uri: /?f=/etc/passwd}\noutput: {non_triggered_rules: [930120]}\n",
        );

        let outcome = driver.execute(&test);
        assert_eq!(outcome.state, TestState::Failed);
        assert_eq!(outcome.errors, vec!["Expected rule 930120 to not be triggered"]);
        assert!(!outcome.variables.is_empty());
    }

    #[test]
    fn test_logs_do_not_leak_between_tests() {
        let driver = ExecutionDriver::new(engine());
        let noisy = test_from("input: {headers: {User-Agent: nikto}}\n");
        let quiet = test_from("input: {uri: /}\n");

        assert_eq!(driver.execute(&noisy).error_lines.len(), 1);
        assert!(driver.execute(&quiet).error_lines.is_empty());
    }

    /// Engine whose transactions fail or hang in a chosen phase.
    struct FaultyEngine {
        fail_in: Option<Phase>,
        sleep: Option<Duration>,
    }

    struct FaultyTransaction {
        fail_in: Option<Phase>,
        sleep: Option<Duration>,
    }

    impl InspectionEngine for FaultyEngine {
        fn new_transaction(&self) -> Box<dyn Transaction> {
            Box::new(FaultyTransaction {
                fail_in: self.fail_in,
                sleep: self.sleep,
            })
        }

        fn find_rule_by_id(&self, _id: u64) -> Option<&RuleDefinition> {
            None
        }

        fn rule_count(&self) -> usize {
            0
        }
    }

    impl Transaction for FaultyTransaction {
        fn id(&self) -> &str {
            "faulty"
        }
        fn process_connection(&mut self, _: &str, _: u16, _: &str, _: u16) {}
        fn add_request_headers(&mut self, _: &RequestLine, _: &[(String, String)]) {}
        fn append_request_body(&mut self, _: &[u8]) {}
        fn add_response_headers(&mut self, _: u16, _: &str, _: &[(String, String)]) {}
        fn append_response_body(&mut self, _: &[u8]) {}

        fn run_phase(&mut self, phase: Phase, _: &mut LogSink) -> Result<PhaseOutcome, EvalError> {
            if let Some(sleep) = self.sleep {
                std::thread::sleep(sleep);
            }
            if self.fail_in == Some(phase) {
                return Err(EvalError::Internal("boom".to_string()));
            }
            Ok(PhaseOutcome::Ran { interrupted: false })
        }

        fn matched_rules(&self) -> &[MatchedRule] {
            &[]
        }
        fn interruption(&self) -> Option<&Interruption> {
            None
        }
        fn final_status(&self) -> u16 {
            200
        }
        fn variables(&self) -> Vec<VariableEntry> {
            Vec::new()
        }
    }

    fn faulty(fail_in: Option<Phase>, sleep: Option<Duration>) -> ExecutionDriver {
        ExecutionDriver::new(Arc::new(FaultyEngine { fail_in, sleep }))
    }

    #[test]
    fn test_phase_error_stops_the_test() {
        let driver = faulty(Some(Phase::RequestBody), None);
        let outcome = driver.execute(&test_from("input: {}\n"));

        assert_eq!(outcome.state, TestState::Failed);
        assert_eq!(outcome.phases_run, vec![Phase::RequestHeaders]);
        assert_eq!(
            outcome.execution_error,
            Some(ExecutionError::Phase {
                phase: Phase::RequestBody,
                message: "boom".to_string()
            })
        );
        assert_eq!(outcome.errors, vec!["phase request-body failed: boom"]);
    }

    #[test]
    fn test_expected_error() {
        let driver = faulty(Some(Phase::RequestBody), None);
        let outcome = driver.execute(&test_from("input: {}\noutput: {expect_error: true}\n"));
        assert!(outcome.passed(), "{:?}", outcome.errors);

        let driver = faulty(None, None);
        let outcome = driver.execute(&test_from("input: {}\noutput: {expect_error: true}\n"));
        assert_eq!(
            outcome.errors,
            vec!["Expected an evaluation error, but none occurred"]
        );
    }

    #[test]
    fn test_timeout_is_a_distinct_error() {
        let driver = faulty(None, Some(Duration::from_millis(200)))
            .with_timeout(Some(Duration::from_millis(20)));
        let outcome = driver.execute(&test_from("input: {}\n"));

        assert_eq!(outcome.state, TestState::Failed);
        assert!(matches!(
            outcome.execution_error,
            Some(ExecutionError::Timeout { .. })
        ));
        assert!(outcome.errors[0].contains("timed out"));
    }

    #[test]
    fn test_timeout_not_hit_uses_worker_result() {
        let driver = ExecutionDriver::new(engine()).with_timeout(Some(Duration::from_secs(5)));
        let test = test_from("input: {uri: /?f=/etc/passwd}\noutput: {status: 403}\n");
        assert!(driver.execute(&test).passed());
    }

    #[test]
    fn test_timeout_worker_accepts_any_test_name() {
        let driver = ExecutionDriver::new(engine()).with_timeout(Some(Duration::from_secs(5)));
        let mut test = test_from("input: {uri: /}\n");
        test.name = "odd\0name".to_string();
        let outcome = driver.execute(&test);
        assert!(outcome.passed(), "{:?}", outcome.errors);
    }

    #[test]
    fn test_expected_output_is_passed_through() {
        let test = test_from("input: {}\noutput: {log_contains: 'x', headers: {Server: y}}\n");
        assert_eq!(
            test.expected,
            ExpectedOutput {
                log_contains: Some("x".to_string()),
                headers: [("Server".to_string(), "y".to_string())].into(),
                ..ExpectedOutput::default()
            }
        );
        assert_eq!(test.response.headers, vec![("Server".to_string(), "y".to_string())]);
    }
}
