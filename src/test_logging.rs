//! Structured test reporting for the conformance suites.
//!
//! [`TestHarness`] records phases and assertions as a test runs, emits
//! tracing events along the way, and produces a serializable
//! [`TestSummary`] at the end. On failure the summary is written as JSON
//! to the directory named by `PARCORE_TEST_ARTIFACTS_DIR`, so a wedged CI
//! run leaves behind a machine-readable account of how far the test got.
//!
//! # Example
//! ```
//! use parcore::test_logging::TestHarness;
//!
//! let mut harness = TestHarness::new("doc_example");
//! harness.enter_phase("work");
//! parcore::harness_assert_eq!(harness, "arithmetic", 4, 2 + 2);
//! harness.exit_phase();
//! let summary = harness.finish();
//! assert!(summary.passed);
//! ```

use std::time::Instant;

use serde::Serialize;

/// One recorded assertion.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionRecord {
    /// What was being checked.
    pub description: String,
    /// Whether the check held.
    pub passed: bool,
    /// Expected value, stringified.
    pub expected: String,
    /// Actual value, stringified.
    pub actual: String,
    /// Phase path at the time of the check, e.g. `"setup > spawn"`.
    pub phase_path: String,
    /// Milliseconds since the harness was created.
    pub elapsed_ms: f64,
}

/// One phase of a test, with the assertions recorded inside it.
///
/// Phases nest; `depth` carries the nesting level so the flat list in
/// [`TestSummary`] can be rendered as a tree without rebuilding one.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseNode {
    /// Phase name.
    pub name: String,
    /// Nesting depth, zero for top-level phases.
    pub depth: usize,
    /// Milliseconds from harness creation to phase entry.
    pub start_ms: f64,
    /// Milliseconds from harness creation to phase exit, if it exited.
    pub end_ms: Option<f64>,
    /// Assertions recorded while this phase was innermost.
    pub assertions: Vec<AssertionRecord>,
}

/// The final account of a harnessed test.
#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    /// Name of the test.
    pub test_name: String,
    /// True when every recorded assertion passed.
    pub passed: bool,
    /// Total assertions recorded.
    pub total_assertions: usize,
    /// Assertions that passed.
    pub passed_assertions: usize,
    /// Assertions that failed.
    pub failed_assertions: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// Phases in entry order, depth-tagged.
    pub phases: Vec<PhaseNode>,
    /// Paths of artifacts written on failure.
    pub failure_artifacts: Vec<String>,
}

/// Phase- and assertion-recording harness for a single test.
///
/// The harness never panics on a failed check itself; the
/// [`harness_assert_eq!`](crate::harness_assert_eq) and
/// [`harness_assert!`](crate::harness_assert) macros record first and
/// panic after, so the failure still appears in the summary artifact.
#[derive(Debug)]
pub struct TestHarness {
    test_name: String,
    start: Instant,
    phases: Vec<PhaseNode>,
    /// Indices into `phases` for the currently open phases, outermost first.
    open: Vec<usize>,
    passed_assertions: usize,
    failed_assertions: usize,
}

impl TestHarness {
    /// Creates a harness for the named test.
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        tracing::info!(test = %test_name, "harness started");
        Self {
            test_name: test_name.to_string(),
            start: Instant::now(),
            phases: Vec::new(),
            open: Vec::new(),
            passed_assertions: 0,
            failed_assertions: 0,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    fn phase_path(&self) -> String {
        self.open
            .iter()
            .map(|&idx| self.phases[idx].name.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// Opens a phase nested inside the current one.
    pub fn enter_phase(&mut self, name: &str) {
        let depth = self.open.len();
        tracing::info!(phase = %name, depth, ">>> phase");
        self.phases.push(PhaseNode {
            name: name.to_string(),
            depth,
            start_ms: self.elapsed_ms(),
            end_ms: None,
            assertions: Vec::new(),
        });
        self.open.push(self.phases.len() - 1);
    }

    /// Closes the innermost open phase. A stray call with no phase open
    /// is ignored.
    pub fn exit_phase(&mut self) {
        let Some(idx) = self.open.pop() else {
            return;
        };
        let now = self.elapsed_ms();
        let phase = &mut self.phases[idx];
        phase.end_ms = Some(now);
        tracing::info!(
            phase = %phase.name,
            duration_ms = now - phase.start_ms,
            "<<< phase"
        );
    }

    /// Records an equality check and returns whether it held.
    pub fn assert_eq<E, A>(&mut self, description: &str, expected: &E, actual: &A) -> bool
    where
        E: std::fmt::Debug,
        A: std::fmt::Debug + PartialEq<E>,
    {
        let passed = actual == expected;
        self.record(
            description,
            passed,
            format!("{expected:?}"),
            format!("{actual:?}"),
        );
        passed
    }

    /// Records a boolean check and returns its value.
    pub fn assert_true(&mut self, description: &str, condition: bool) -> bool {
        self.record(
            description,
            condition,
            "true".to_string(),
            condition.to_string(),
        );
        condition
    }

    fn record(&mut self, description: &str, passed: bool, expected: String, actual: String) {
        if passed {
            self.passed_assertions += 1;
            tracing::debug!(check = %description, "assertion passed");
        } else {
            self.failed_assertions += 1;
            tracing::error!(
                check = %description,
                expected = %expected,
                actual = %actual,
                "assertion FAILED"
            );
        }
        if self.open.is_empty() {
            // Checks before the first phase get an implicit one.
            self.enter_phase("(unphased)");
        }
        let record = AssertionRecord {
            description: description.to_string(),
            passed,
            expected,
            actual,
            phase_path: self.phase_path(),
            elapsed_ms: self.elapsed_ms(),
        };
        if let Some(&idx) = self.open.last() {
            self.phases[idx].assertions.push(record);
        }
    }

    /// Closes the harness and returns the summary.
    ///
    /// Any still-open phases are closed at the current time. When the test
    /// failed and `PARCORE_TEST_ARTIFACTS_DIR` names a writable directory,
    /// the summary is also written there as `<test_name>.json`.
    pub fn finish(mut self) -> TestSummary {
        while !self.open.is_empty() {
            self.exit_phase();
        }
        let passed = self.failed_assertions == 0;
        let mut summary = TestSummary {
            test_name: self.test_name,
            passed,
            total_assertions: self.passed_assertions + self.failed_assertions,
            passed_assertions: self.passed_assertions,
            failed_assertions: self.failed_assertions,
            duration_ms: self.start.elapsed().as_secs_f64() * 1000.0,
            phases: self.phases,
            failure_artifacts: Vec::new(),
        };
        if !passed {
            if let Some(path) = write_failure_artifact(&summary) {
                summary.failure_artifacts.push(path);
            }
        }
        tracing::info!(
            test = %summary.test_name,
            passed = summary.passed,
            assertions = summary.total_assertions,
            duration_ms = summary.duration_ms,
            "harness finished"
        );
        summary
    }

    /// Closes the harness and returns the summary as pretty-printed JSON.
    #[must_use]
    pub fn finish_json(self) -> String {
        let summary = self.finish();
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Writes the summary JSON into `PARCORE_TEST_ARTIFACTS_DIR`, returning
/// the path on success.
fn write_failure_artifact(summary: &TestSummary) -> Option<String> {
    let dir = std::env::var("PARCORE_TEST_ARTIFACTS_DIR").ok()?;
    if dir.is_empty() {
        return None;
    }
    let path = std::path::Path::new(&dir).join(format!("{}.json", summary.test_name));
    let json = serde_json::to_string_pretty(summary).ok()?;
    match std::fs::write(&path, json) {
        Ok(()) => Some(path.display().to_string()),
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "failed to write failure artifact");
            None
        }
    }
}

/// Assert equality within a [`TestHarness`], recording the result.
///
/// Panics if the assertion fails, after the failure has been recorded.
#[macro_export]
macro_rules! harness_assert_eq {
    ($harness:expr, $desc:expr, $expected:expr, $actual:expr) => {
        if !$harness.assert_eq($desc, &$expected, &$actual) {
            panic!(
                "harness assertion failed: {}: expected {:?}, got {:?}",
                $desc, $expected, $actual
            );
        }
    };
}

/// Assert a condition within a [`TestHarness`], recording the result.
///
/// Panics if the assertion fails, after the failure has been recorded.
#[macro_export]
macro_rules! harness_assert {
    ($harness:expr, $desc:expr, $cond:expr) => {
        if !$harness.assert_true($desc, $cond) {
            panic!("harness assertion failed: {}", $desc);
        }
    };
}
