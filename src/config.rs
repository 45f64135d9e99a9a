//! Settings for a bktec run.
//!
//! Settings come from command line flags, each of which falls back to an
//! environment variable (see [`ConfigArgs`]). [`Config::from_args`] turns
//! the flags into an immutable [`Config`] and validates it, reporting every
//! offending setting at once:
//!
//! ```text
//! invalid config: BUILDKITE_PARALLEL_JOB_COUNT must be between 1 and 1000,
//! BUILDKITE_TEST_ENGINE_SUITE_SLUG must not be blank
//! ```
//!
//! The config is also sent to the planning service as part of the run
//! metadata, so it serializes without the access token.

pub mod args;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::runner::RunnerConfig;

pub use args::{ConfigArgs, parse_bool};

/// Upper bound for `parallelism` and `max_parallelism`.
pub const MAX_PARALLELISM: usize = 1000;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more settings failed validation.
    #[error("invalid config: {}", join_sorted(.0))]
    Invalid(Vec<FieldError>),
}

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the environment variable backing the setting.
    pub name: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.message)
    }
}

fn join_sorted(errors: &[FieldError]) -> String {
    let mut messages: Vec<String> = errors.iter().map(FieldError::to_string).collect();
    messages.sort();
    messages.join(",\n")
}

/// Which subcommand the config is validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    /// Plans only; node placement is not needed.
    Plan,
}

/// Validated settings for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub build_id: String,
    pub job_id: String,
    pub step_id: String,
    #[serde(skip)]
    pub access_token: String,
    pub organization_slug: String,
    pub suite_slug: String,
    pub base_url: String,
    /// Plan identifier shared by all nodes of a build.
    pub identifier: String,
    pub branch: String,
    pub job_retry_count: usize,
    pub node_index: usize,
    pub parallelism: usize,
    pub max_parallelism: usize,
    #[serde(serialize_with = "serialize_seconds")]
    pub target_time: Duration,
    pub max_retries: usize,
    pub retry_for_muted_tests: bool,
    pub fail_on_no_tests: bool,
    pub split_by_example: bool,
    pub test_runner: String,
    pub test_command: String,
    pub retry_command: String,
    pub test_file_pattern: String,
    pub test_file_exclude_pattern: String,
    pub result_path: String,
    pub tag_filters: String,
    pub location_prefix: String,
    /// Files list overriding discovery, if any.
    pub files: String,
}

fn serialize_seconds<S: serde::Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(value.as_secs_f64())
}

impl Config {
    /// Builds and validates the config for `mode`.
    pub fn from_args(args: &ConfigArgs, mode: Mode) -> ConfigResult<Self> {
        let identifier = match args.plan_identifier.as_deref() {
            Some(identifier) if !identifier.is_empty() => identifier.to_string(),
            _ if args.build_id.is_empty() && args.step_id.is_empty() => String::new(),
            _ => format!("{}/{}", args.build_id, args.step_id),
        };

        let config = Self {
            build_id: args.build_id.clone(),
            job_id: args.job_id.clone(),
            step_id: args.step_id.clone(),
            access_token: args.access_token.clone(),
            organization_slug: args.organization_slug.clone(),
            suite_slug: args.suite_slug.clone(),
            base_url: args.base_url.clone(),
            identifier,
            branch: args.branch.clone(),
            job_retry_count: args.retry_count,
            node_index: args.parallel_job,
            parallelism: args.parallelism,
            max_parallelism: args.max_parallelism,
            target_time: args.target_time,
            max_retries: args.test_engine_retry_count,
            retry_for_muted_tests: !args.disable_retry_muted,
            fail_on_no_tests: args.fail_on_no_tests,
            split_by_example: args.split_by_example,
            test_runner: args.test_runner.clone(),
            test_command: args.test_command.clone(),
            retry_command: args.retry_command.clone(),
            test_file_pattern: args.test_file_pattern.clone(),
            test_file_exclude_pattern: args.test_file_exclude_pattern.clone(),
            result_path: args.result_path.clone(),
            tag_filters: args.tag_filters.clone(),
            location_prefix: args.location_prefix.clone(),
            files: args.files.clone(),
        };

        config.validate(mode)?;
        Ok(config)
    }

    /// Checks every rule and reports all failures together.
    pub fn validate(&self, mode: Mode) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut fail = |name: &'static str, message: String| {
            errors.push(FieldError { name, message });
        };

        for (name, value) in [
            ("BUILDKITE_TEST_ENGINE_API_ACCESS_TOKEN", &self.access_token),
            ("BUILDKITE_ORGANIZATION_SLUG", &self.organization_slug),
            ("BUILDKITE_TEST_ENGINE_SUITE_SLUG", &self.suite_slug),
            ("BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER", &self.identifier),
        ] {
            if value.is_empty() {
                fail(name, "must not be blank".to_string());
            }
        }

        if mode == Mode::Run {
            if !(1..=MAX_PARALLELISM).contains(&self.parallelism) {
                fail(
                    "BUILDKITE_PARALLEL_JOB_COUNT",
                    format!("must be between 1 and {}", MAX_PARALLELISM),
                );
            } else if self.node_index >= self.parallelism {
                fail(
                    "BUILDKITE_PARALLEL_JOB",
                    format!("must be less than {}", self.parallelism),
                );
            }
        }

        if self.max_parallelism > MAX_PARALLELISM {
            fail(
                "BUILDKITE_TEST_ENGINE_MAX_PARALLELISM",
                format!("must not be greater than {}", MAX_PARALLELISM),
            );
        }

        if !is_http_url(&self.base_url) {
            fail(
                "BUILDKITE_TEST_ENGINE_BASE_URL",
                "must be a valid URL".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// The subset of settings the runner adapters consume.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(self.test_runner.clone())
            .with_test_command(self.test_command.clone())
            .with_retry_test_command(self.retry_command.clone())
            .with_test_file_pattern(self.test_file_pattern.clone())
            .with_test_file_exclude_pattern(self.test_file_exclude_pattern.clone())
            .with_result_path(self.result_path.clone())
            .with_tag_filters(self.tag_filters.clone())
            .with_location_prefix(self.location_prefix.clone())
    }
}

/// Absolute `http` or `https` URL with a host.
fn is_http_url(value: &str) -> bool {
    let Some(rest) = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
    else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty() && !host.contains(char::is_whitespace)
}
