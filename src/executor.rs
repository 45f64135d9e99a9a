//! Drives a node's shard through the runner and its retries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     run_tests_with_retry                         │
//! │                                                                  │
//! │   shard ──► attempt 0 ──► failed? ──► attempt 1 ──► ... ──► done │
//! │                │                         │                       │
//! │                ▼                         ▼                       │
//! │         TestRunner::run           TestRunner::run (retry)        │
//! │                │                         │                       │
//! │                └──────────┬──────────────┘                       │
//! │                           ▼                                      │
//! │                       RunResult  ◄── muted tests from the plan   │
//! │                                                                  │
//! │   Timeline: test_start, test_end, retry_1_start, retry_1_end ... │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`run_tests_with_retry`]: the attempt loop
//! - [`RunResult`]: per-test outcomes across attempts
//! - [`Timeline`]: attempt boundaries sent with the run metadata

pub mod result;
pub mod retry;
pub mod timeline;

use crate::runner::RunnerError;

pub use result::{RunResult, RunStatistics, RunStatus, TestOutcome, TestStatus};
pub use retry::{RetryOptions, run_tests_with_retry};
pub use timeline::{Timeline, TimelineEvent};

/// Result type for the retry loop.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors that stop a run before it finishes.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The shard is empty and empty shards are configured to fail.
    #[error("no tests assigned to this node")]
    NoTests,

    /// The runner could not complete an attempt.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl ExecutorError {
    /// Returns the terminating signal when the runner was killed by one.
    pub fn signal(&self) -> Option<i32> {
        match self {
            ExecutorError::Runner(e) => e.signal(),
            ExecutorError::NoTests => None,
        }
    }
}
