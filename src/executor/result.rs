//! Accumulates per-test outcomes for a single node's run.
//!
//! A [`RunResult`] is created once per run, seeded with the plan's muted
//! tests, and then written by the runner adapter on every attempt. The last
//! recorded status of a test wins; the number of recordings is kept so that
//! tests which passed only after a retry can be told apart.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::plan::TestCase;

/// Outcome of a single test in a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
    /// The runner could not complete an attempt.
    Error,
    /// Nothing was recorded.
    Unknown,
}

/// The accumulated outcome of one test across all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub test_case: TestCase,
    pub status: TestStatus,
    pub execution_count: usize,
    pub muted: bool,
}

/// Counts sent to the service with the run metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: usize,
    pub passed_on_first_run: usize,
    pub passed_on_retry: usize,
    pub muted_passed: usize,
    pub muted_failed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcomes for every test recorded during a run.
#[derive(Debug, Default)]
pub struct RunResult {
    tests: BTreeMap<String, TestOutcome>,
    muted: HashSet<String>,
    error: Option<String>,
}

impl RunResult {
    /// Creates an empty result. `muted_tests` seeds the muted lookup; entries
    /// that never run on this node are simply never consulted.
    pub fn new(muted_tests: &[TestCase]) -> Self {
        Self {
            tests: BTreeMap::new(),
            muted: muted_tests.iter().map(TestCase::key).collect(),
            error: None,
        }
    }

    /// Records the outcome of `test_case` for the current attempt.
    pub fn record_test_result(&mut self, test_case: TestCase, status: TestStatus) {
        let key = test_case.key();
        let muted = self.muted.contains(&key);

        self.tests
            .entry(key)
            .and_modify(|outcome| {
                outcome.status = status;
                outcome.execution_count += 1;
                outcome.test_case = test_case.clone();
            })
            .or_insert(TestOutcome {
                test_case,
                status,
                execution_count: 1,
                muted,
            });
    }

    /// Records a fatal error. Once set the run reports [`RunStatus::Error`].
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// All outcomes, ordered by test key.
    pub fn outcomes(&self) -> impl Iterator<Item = &TestOutcome> {
        self.tests.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Failing tests that are not muted. These drive retries and the exit
    /// code.
    pub fn failed_tests(&self) -> Vec<TestCase> {
        self.collect(|o| o.status == TestStatus::Failed && !o.muted)
    }

    /// Failing tests that are muted.
    pub fn failed_muted_tests(&self) -> Vec<TestCase> {
        self.collect(|o| o.status == TestStatus::Failed && o.muted)
    }

    pub fn skipped_tests(&self) -> Vec<TestCase> {
        self.collect(|o| o.status == TestStatus::Skipped)
    }

    /// Every muted outcome regardless of status.
    pub fn muted_tests(&self) -> Vec<&TestOutcome> {
        self.tests.values().filter(|o| o.muted).collect()
    }

    pub fn status(&self) -> RunStatus {
        if self.error.is_some() {
            RunStatus::Error
        } else if self.tests.is_empty() {
            RunStatus::Unknown
        } else if self.tests.values().any(|o| o.status == TestStatus::Failed && !o.muted) {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        }
    }

    pub fn statistics(&self) -> RunStatistics {
        let mut stats = RunStatistics {
            total: self.tests.len(),
            ..Default::default()
        };

        for outcome in self.tests.values() {
            if outcome.muted {
                match outcome.status {
                    TestStatus::Passed => stats.muted_passed += 1,
                    TestStatus::Failed => stats.muted_failed += 1,
                    TestStatus::Skipped => stats.skipped += 1,
                }
                continue;
            }

            match outcome.status {
                TestStatus::Passed if outcome.execution_count > 1 => stats.passed_on_retry += 1,
                TestStatus::Passed => stats.passed_on_first_run += 1,
                TestStatus::Failed => stats.failed += 1,
                TestStatus::Skipped => stats.skipped += 1,
            }
        }

        stats
    }

    fn collect(&self, predicate: impl Fn(&TestOutcome) -> bool) -> Vec<TestCase> {
        self.tests
            .values()
            .filter(|o| predicate(o))
            .map(|o| o.test_case.clone())
            .collect()
    }
}
