//! Test runner adapters.
//!
//! Each supported test framework is wrapped in an adapter implementing
//! [`TestRunner`]. The orchestrator only talks to this trait: it asks the
//! adapter for the files to plan with, optionally for the individual
//! examples inside slow files, and then to run a shard of test cases,
//! recording every outcome into a shared [`RunResult`].
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          TestRunner                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  get_files() ─────────────► ["spec/a_spec.rb", ...]  (discovery) │
//! │  get_examples(files) ─────► [TestCase, ...]          (dry run)   │
//! │  run(result, cases, retry)                                        │
//! │      │ CommandTemplate ──► CommandSpec                            │
//! │      │ run_and_forward_signal(CommandSpec)                        │
//! │      └ parse report ──► result.record_test_result(case, status)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Runners
//!
//! | Name | Adapter | Result format |
//! |------|---------|---------------|
//! | `rspec` | [`rspec::Rspec`] | RSpec JSON formatter |
//! | `jest` | [`jest::Jest`] | Jest `--json` report |
//! | `cypress` | [`cypress::Cypress`] | exit status only |
//! | `playwright` | [`playwright::Playwright`] | Playwright JSON reporter |
//! | `pytest` | [`pytest::Pytest`] | Test Engine collector JSON |
//! | `pytest-pants` | [`pytest_pants::PytestPants`] | Test Engine collector JSON |
//! | `gotest` | [`gotest::GoTest`] | gotestsum JUnit XML |
//! | `cucumber` | [`cucumber::Cucumber`] | Cucumber JSON formatter |
//! | `custom` | [`custom::Custom`] | optional Test Engine JSON |
//!
//! # Failure handling
//!
//! A test failure is not an error: it is recorded and later drives retries.
//! An adapter only returns an error when the attempt itself could not be
//! trusted: the command could not be built, the child was killed by a
//! signal, or it exited abnormally without leaving a readable report.

pub mod command;
pub mod cucumber;
pub mod custom;
pub mod cypress;
#[cfg(test)]
pub mod fake;
pub mod gotest;
pub mod jest;
pub mod playwright;
pub mod process;
pub mod pytest;
pub mod pytest_pants;
pub mod rspec;
pub mod test_engine;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::discovery::{self, DiscoveryError};
use crate::executor::RunResult;
use crate::plan::TestCase;

pub use command::{CommandSpec, CommandTemplate};
pub use process::{ProcessError, ProcessResult, run_and_forward_signal};

/// Runner names accepted by [`detect_runner`].
pub const RUNNER_NAMES: &[&str] = &[
    "rspec",
    "jest",
    "cypress",
    "playwright",
    "pytest",
    "pytest-pants",
    "gotest",
    "cucumber",
    "custom",
];

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors raised by runner adapters.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The configured runner name is not one of [`RUNNER_NAMES`].
    #[error(
        "runner value is invalid, possible values are 'rspec', 'jest', 'cypress', 'playwright', \
         'pytest', 'pytest-pants', 'gotest', 'cucumber', 'custom' (got {0:?})"
    )]
    UnknownRunner(String),

    /// The runner configuration is unusable.
    #[error("{0}")]
    InvalidConfig(String),

    /// The command template could not be turned into a command.
    #[error("failed to build command: {0}")]
    CommandBuild(String),

    /// File discovery matched nothing.
    #[error("no files found with pattern {pattern:?} and exclude pattern {exclude:?}")]
    NoFilesFound { pattern: String, exclude: String },

    /// File discovery failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A report or dry-run output could not be read.
    #[error("failed to parse {runner} output: {message}")]
    ResultParse { runner: String, message: String },

    /// A dry run used to enumerate examples failed.
    #[error("failed to run {runner} dry run: {output}")]
    DryRun { runner: String, output: String },

    /// The operation is not available for this runner.
    #[error("{0}")]
    NotSupported(String),

    /// The supervised subprocess failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Returns the terminating signal when the runner was killed by one.
    pub fn signal(&self) -> Option<i32> {
        match self {
            RunnerError::Process(e) => e.signal(),
            _ => None,
        }
    }
}

/// Options shared by every adapter. Empty strings mean "use the adapter's
/// default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Runner name, one of [`RUNNER_NAMES`].
    pub name: String,
    pub test_command: String,
    pub retry_test_command: String,
    pub test_file_pattern: String,
    pub test_file_exclude_pattern: String,
    pub result_path: String,
    /// Marker expression passed to runners that support tag filtering.
    pub tag_filters: String,
    /// Path prefix the runner adds to locations in its output.
    pub location_prefix: String,
}

impl RunnerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = command.into();
        self
    }

    pub fn with_retry_test_command(mut self, command: impl Into<String>) -> Self {
        self.retry_test_command = command.into();
        self
    }

    pub fn with_test_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.test_file_pattern = pattern.into();
        self
    }

    pub fn with_test_file_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.test_file_exclude_pattern = pattern.into();
        self
    }

    pub fn with_result_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = path.into();
        self
    }

    pub fn with_tag_filters(mut self, filters: impl Into<String>) -> Self {
        self.tag_filters = filters.into();
        self
    }

    pub fn with_location_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.location_prefix = prefix.into();
        self
    }

    /// Fills empty command, retry command and patterns with defaults.
    fn or_defaults(
        mut self,
        command: &str,
        retry_command: Option<&str>,
        pattern: &str,
        exclude: &str,
    ) -> Self {
        if self.test_command.is_empty() {
            self.test_command = command.to_string();
        }
        if self.retry_test_command.is_empty() {
            self.retry_test_command = retry_command.unwrap_or(&self.test_command).to_string();
        }
        if self.test_file_pattern.is_empty() {
            self.test_file_pattern = pattern.to_string();
        }
        if self.test_file_exclude_pattern.is_empty() {
            self.test_file_exclude_pattern = exclude.to_string();
        }
        self
    }

    /// Returns the configured result path, or a path inside `scratch`.
    fn result_path_or(&self, scratch: &ScratchDir, file_name: &str) -> String {
        if self.result_path.is_empty() {
            scratch.path().join(file_name).to_string_lossy().into_owned()
        } else {
            self.result_path.clone()
        }
    }

    /// Discovers files with the include/exclude patterns. An empty result
    /// is an error.
    fn discover_files(&self) -> RunnerResult<Vec<String>> {
        debug!(
            "Discovering test files with include pattern: {:?} exclude pattern: {:?}",
            self.test_file_pattern, self.test_file_exclude_pattern
        );

        let files = discovery::discover_test_files(
            Path::new("."),
            &self.test_file_pattern,
            &self.test_file_exclude_pattern,
        )?;
        debug!("Discovered {} files", files.len());

        if files.is_empty() {
            return Err(RunnerError::NoFilesFound {
                pattern: self.test_file_pattern.clone(),
                exclude: self.test_file_exclude_pattern.clone(),
            });
        }

        Ok(files)
    }
}

/// What an adapter can do, as advertised to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedFeatures {
    /// Files can be expanded into examples and split individually.
    pub split_by_example: bool,
    /// Failed tests can be re-run by identifier.
    pub auto_retry: bool,
}

impl Default for SupportedFeatures {
    fn default() -> Self {
        Self {
            split_by_example: false,
            auto_retry: true,
        }
    }
}

/// The capability set every runner adapter provides.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Display name, e.g. `RSpec`.
    fn name(&self) -> &str;

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures::default()
    }

    /// Discovers the files this runner would execute.
    async fn get_files(&self) -> RunnerResult<Vec<String>>;

    /// Enumerates the individual examples inside `files`.
    async fn get_examples(&self, _files: &[String]) -> RunnerResult<Vec<TestCase>> {
        Err(RunnerError::NotSupported(format!(
            "not supported in {}",
            self.name()
        )))
    }

    /// Runs `test_cases` and records each outcome into `result`.
    ///
    /// `retry` selects the retry command.
    async fn run(
        &self,
        result: &mut RunResult,
        test_cases: &[TestCase],
        retry: bool,
    ) -> RunnerResult<()>;

    /// Prefix the runner puts in front of reported locations.
    fn location_prefix(&self) -> &str {
        ""
    }
}

/// Builds the adapter named by `config.name`.
pub fn detect_runner(config: &RunnerConfig) -> RunnerResult<Box<dyn TestRunner>> {
    let config = config.clone();
    let runner: Box<dyn TestRunner> = match config.name.as_str() {
        "rspec" => Box::new(rspec::Rspec::new(config)?),
        "jest" => Box::new(jest::Jest::new(config)?),
        "cypress" => Box::new(cypress::Cypress::new(config)),
        "playwright" => Box::new(playwright::Playwright::new(config)?),
        "pytest" => Box::new(pytest::Pytest::new(config)?),
        "pytest-pants" => Box::new(pytest_pants::PytestPants::new(config)?),
        "gotest" => Box::new(gotest::GoTest::new(config)?),
        "cucumber" => Box::new(cucumber::Cucumber::new(config)?),
        "custom" => Box::new(custom::Custom::new(config)?),
        other => return Err(RunnerError::UnknownRunner(other.to_string())),
    };
    debug!("Using {} runner", runner.name());
    Ok(runner)
}

/// Collects the paths of `test_cases`.
fn test_paths(test_cases: &[TestCase]) -> Vec<String> {
    test_cases.iter().map(|t| t.path.clone()).collect()
}

/// Runs one attempt's command. A child killed by a signal aborts the
/// attempt; any other outcome is handed back for report parsing.
async fn run_attempt(command: &CommandSpec) -> RunnerResult<ProcessResult<()>> {
    match run_and_forward_signal(command).await {
        Err(e) if e.signal().is_some() => Err(e.into()),
        outcome => Ok(outcome),
    }
}

/// Reads a report file, mapping failures to [`RunnerError::ResultParse`].
fn read_report(runner: &str, path: &str) -> RunnerResult<String> {
    std::fs::read_to_string(path).map_err(|e| RunnerError::ResultParse {
        runner: runner.to_string(),
        message: format!("failed to read {}: {}", path, e),
    })
}

/// Deserializes a JSON report file.
fn parse_json_report<T: serde::de::DeserializeOwned>(runner: &str, path: &str) -> RunnerResult<T> {
    let data = read_report(runner, path)?;
    serde_json::from_str(&data).map_err(|e| RunnerError::ResultParse {
        runner: runner.to_string(),
        message: e.to_string(),
    })
}

/// Resolves the outcome of an attempt whose report could not be parsed.
///
/// Without a report the failed tests are unknown, so the attempt records
/// nothing and is not retried. A subprocess failure still surfaces.
fn unparsed_report(
    runner: &str,
    parse_error: RunnerError,
    process: ProcessResult<()>,
) -> RunnerResult<()> {
    println!(
        "Buildkite Test Engine Client: Failed to read {} output, tests will not be retried.",
        runner
    );
    tracing::warn!("{}", parse_error);
    process.map_err(RunnerError::from)
}

/// Temporary directory holding generated result files for the lifetime of
/// an adapter.
#[derive(Debug)]
struct ScratchDir {
    _dir: Option<tempfile::TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    fn new(prefix: &str) -> RunnerResult<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            _dir: Some(dir),
            path,
        })
    }

    /// A scratch dir that is never used because the result path is set.
    fn unused() -> Self {
        Self {
            _dir: None,
            path: PathBuf::new(),
        }
    }

    fn for_config(config: &RunnerConfig, prefix: &str) -> RunnerResult<Self> {
        if config.result_path.is_empty() {
            Self::new(prefix)
        } else {
            Ok(Self::unused())
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
