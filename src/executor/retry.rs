//! The attempt loop.
//!
//! Attempt 0 runs the whole shard. Every later attempt runs only the tests
//! still failing after the previous one, until nothing is left to retry or
//! the retry budget is spent. Muted failures are retried only when
//! [`RetryOptions::retry_for_muted`] is set.

use tracing::debug;

use super::{ExecutorError, ExecutorResult, RunResult, Timeline};
use crate::plan::TestCase;
use crate::runner::TestRunner;

/// Retry policy for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOptions {
    /// Attempts after the first one.
    pub max_retries: usize,
    /// Retry muted tests that failed, to collect flakiness data.
    pub retry_for_muted: bool,
    /// Treat an empty shard as an error.
    pub fail_on_no_tests: bool,
}

impl RetryOptions {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_retry_for_muted(mut self, retry_for_muted: bool) -> Self {
        self.retry_for_muted = retry_for_muted;
        self
    }

    pub fn with_fail_on_no_tests(mut self, fail_on_no_tests: bool) -> Self {
        self.fail_on_no_tests = fail_on_no_tests;
        self
    }
}

/// Runs `test_cases` and retries failures according to `options`.
///
/// On return `test_cases` holds the cases targeted by the last attempt.
/// Every attempt appends a start and an end event to `timeline`, even when
/// the runner fails; a runner error ends the loop immediately.
pub async fn run_tests_with_retry(
    runner: &dyn TestRunner,
    test_cases: &mut Vec<TestCase>,
    muted_tests: &[TestCase],
    timeline: &mut Timeline,
    options: RetryOptions,
) -> ExecutorResult<RunResult> {
    let mut result = RunResult::new(muted_tests);

    if test_cases.is_empty() {
        if options.fail_on_no_tests {
            return Err(ExecutorError::NoTests);
        }
        println!("+++ Buildkite Test Engine Client: No tests to run on this node");
        return Ok(result);
    }

    let mut attempt = 0;
    loop {
        if attempt == 0 {
            println!("+++ Buildkite Test Engine Client: Running tests");
        } else {
            println!(
                "+++ Buildkite Test Engine Client: ♻️ Attempt {} of {} to retry failing tests",
                attempt, options.max_retries
            );
        }

        timeline.attempt_start(attempt);
        let outcome = runner.run(&mut result, test_cases, attempt > 0).await;
        timeline.attempt_end(attempt);
        outcome?;

        if attempt == options.max_retries {
            return Ok(result);
        }

        let failed = result.failed_tests();
        let failed_muted = result.failed_muted_tests();
        let retry_muted = options.retry_for_muted && !failed_muted.is_empty();

        if failed.is_empty() && !retry_muted {
            return Ok(result);
        }

        debug!(
            "Retrying {} failed and {} failed muted tests",
            failed.len(),
            if retry_muted { failed_muted.len() } else { 0 }
        );
        *test_cases = failed;
        if retry_muted {
            test_cases.extend(failed_muted);
        }
        attempt += 1;
    }
}
