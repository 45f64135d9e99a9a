//! The `run` and `plan` commands.
//!
//! # Architecture
//!
//! ```text
//!   Config ──► detect_runner ──► get_test_files
//!                                      │
//!                                      ▼
//!                        fetch_or_create_plan ◄──► PlanService
//!                                      │
//!                     plan.tasks[node_index] (location prefix stripped)
//!                                      │
//!                                      ▼
//!                        run_tests_with_retry ──► TestRunner
//!                                      │
//!                    ┌─────────────────┼───────────────────┐
//!                    ▼                 ▼                   ▼
//!             post_metadata      print_report         RunStatus
//!           (non-fallback only)                     (exit 0 or 1)
//! ```
//!
//! A runner killed by a signal short-circuits everything after the retry
//! loop; the process then exits with `128 + signal`
//! (see [`OrchestratorError::exit_code`]).

pub mod plan;
pub mod planning;

use std::path::Path;

use console::style;
use tracing::debug;

use crate::api::{PlanService, TestPlanMetadata};
use crate::config::Config;
use crate::discovery;
use crate::executor::{
    ExecutorError, RetryOptions, RunResult, RunStatus, Timeline, run_tests_with_retry,
};
use crate::plan::{TestCase, TestFormat};
use crate::report::print_report;
use crate::runner::{ProcessError, RunnerError, TestRunner, detect_runner};

pub use plan::{PlanOutput, PlanSummary, create_plan_summary, emit_summary};
pub use planning::{PlanRequestError, create_request_params, fetch_or_create_plan};

/// Version reported in the banner and the run metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LOGO: &str = r"
______ ______ _____
___  /____  /___  /____________
__  __ \_  //_/  __/  _ \  ___/
_  /_/ /  ,<  / /_ /  __/ /__
/_.___//_/|_| \__/ \___/\___/
";

/// Result type for the commands.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that end a command.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("unsupported value for BUILDKITE_TEST_ENGINE_TEST_RUNNER: {0}")]
    UnsupportedRunner(#[source] RunnerError),

    /// Test files could not be listed.
    #[error(transparent)]
    TestFiles(RunnerError),

    #[error("couldn't fetch or create test plan: {0}")]
    FetchPlan(#[source] PlanRequestError),

    #[error("create test plan failed: {0}")]
    CreatePlan(#[source] PlanRequestError),

    #[error("{runner} was terminated with signal: {signal}")]
    RunnerSignaled { runner: String, signal: i32 },

    #[error("{runner} exited with error: {source}")]
    RunnerFailed {
        runner: String,
        #[source]
        source: RunnerError,
    },

    /// The retry loop refused to start, e.g. on an empty shard.
    #[error(transparent)]
    Executor(ExecutorError),

    #[error("pipeline upload failed: {0}")]
    PipelineUpload(#[source] ProcessError),

    #[error("writing plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Process exit code for this error: `128 + signal` when the runner was
    /// killed by a signal, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::RunnerSignaled { signal, .. } => 128 + signal,
            _ => 1,
        }
    }
}

/// Prints the startup banner to stderr.
pub fn print_startup_message() {
    eprintln!("+++ Buildkite Test Engine Client: bktec {}\n", VERSION);
    eprintln!("{}", style(LOGO).green());
}

/// The `run` command: runs this node's share of the plan.
///
/// Returns the final status of the run; callers exit non-zero for
/// [`RunStatus::Failed`] and [`RunStatus::Error`].
pub async fn run(config: &Config, service: &dyn PlanService) -> OrchestratorResult<RunStatus> {
    let runner =
        detect_runner(&config.runner_config()).map_err(OrchestratorError::UnsupportedRunner)?;
    run_with_runner(config, service, runner.as_ref()).await
}

/// [`run`] with an already selected runner.
pub async fn run_with_runner(
    config: &Config,
    service: &dyn PlanService,
    runner: &dyn TestRunner,
) -> OrchestratorResult<RunStatus> {
    let files = get_test_files(&config.files, runner).await?;

    let plan = fetch_or_create_plan(service, config, &files, runner)
        .await
        .map_err(OrchestratorError::FetchPlan)?;

    let mut test_cases = plan
        .task_for_node(config.node_index)
        .map(|task| task.tests.clone())
        .unwrap_or_default();
    strip_location_prefix(&mut test_cases, runner.location_prefix());

    let max_retries = if runner.supported_features().auto_retry {
        config.max_retries
    } else {
        0
    };
    let options = RetryOptions::new(max_retries)
        .with_retry_for_muted(config.retry_for_muted_tests)
        .with_fail_on_no_tests(config.fail_on_no_tests);

    let mut timeline = Timeline::new();
    let result = run_tests_with_retry(
        runner,
        &mut test_cases,
        &plan.muted_tests,
        &mut timeline,
        options,
    )
    .await
    .map_err(|e| runner_error(runner.name(), e))?;

    if !plan.fallback {
        send_metadata(service, config, &timeline, &result).await;
    }

    print_report(&result, &plan.skipped_tests, runner.name());

    Ok(result.status())
}

/// The `plan` command: creates a plan and hands its summary to `output`.
pub async fn plan(
    config: &Config,
    service: &dyn PlanService,
    output: &PlanOutput,
) -> OrchestratorResult<()> {
    let runner =
        detect_runner(&config.runner_config()).map_err(OrchestratorError::UnsupportedRunner)?;
    let files = get_test_files(&config.files, runner.as_ref()).await?;

    let summary = create_plan_summary(service, config, &files, runner.as_ref()).await?;
    emit_summary(&summary, output, &mut std::io::stdout()).await
}

/// Reads the files list at `files_list`, or asks the runner to discover
/// its files when no list is given.
pub async fn get_test_files(
    files_list: &str,
    runner: &dyn TestRunner,
) -> OrchestratorResult<Vec<String>> {
    if !files_list.is_empty() {
        debug!("Reading test files from {}", files_list);
        return discovery::read_files_list(files_list)
            .map_err(|e| OrchestratorError::TestFiles(e.into()));
    }

    runner.get_files().await.map_err(OrchestratorError::TestFiles)
}

/// Rewrites the paths of file-format cases relative to `prefix`.
///
/// Paths outside `prefix` are kept as they are.
fn strip_location_prefix(test_cases: &mut [TestCase], prefix: &str) {
    if prefix.is_empty() {
        return;
    }

    for case in test_cases
        .iter_mut()
        .filter(|c| c.format == TestFormat::File)
    {
        let relative = match Path::new(&case.path).strip_prefix(prefix) {
            Ok(relative) => relative.to_string_lossy().into_owned(),
            Err(_) => {
                debug!(
                    "{} is not under location prefix {}, using the original path",
                    case.path, prefix
                );
                continue;
            }
        };
        case.path = relative;
    }
}

fn runner_error(runner: &str, error: ExecutorError) -> OrchestratorError {
    if let Some(signal) = error.signal() {
        return OrchestratorError::RunnerSignaled {
            runner: runner.to_string(),
            signal,
        };
    }

    match error {
        ExecutorError::Runner(source) => OrchestratorError::RunnerFailed {
            runner: runner.to_string(),
            source,
        },
        other => OrchestratorError::Executor(other),
    }
}

/// Posts the run's timeline and statistics. Failures are reported and
/// otherwise ignored.
async fn send_metadata(
    service: &dyn PlanService,
    config: &Config,
    timeline: &Timeline,
    result: &RunResult,
) {
    let metadata = TestPlanMetadata {
        version: VERSION.to_string(),
        env: serde_json::to_value(config).unwrap_or_default(),
        timeline: timeline.events().to_vec(),
        statistics: result.statistics(),
    };

    if let Err(e) = service
        .post_metadata(&config.suite_slug, &config.identifier, &metadata)
        .await
    {
        println!("Failed to send metadata to Test Engine: {}", e);
    }
}
