//! Command line flags and their environment variables.

use std::time::Duration;

use clap::{ArgAction, Args};

/// Flags shared by `run` and `plan`. Every flag can also be set through the
/// environment variable named next to it.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Path to a file listing the test files to run, one per line.
    /// Overrides test file discovery.
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_FILES", default_value = "")]
    pub files: String,

    /// Tag filters applied when selecting tests (pytest only)
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_TAG_FILTERS", default_value = "")]
    pub tag_filters: String,

    /// Use the plan previously generated with this identifier
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER")]
    pub plan_identifier: Option<String>,

    // Build environment, normally provided by the Buildkite agent.
    #[arg(long, env = "BUILDKITE_ORGANIZATION_SLUG", default_value = "", hide = true)]
    pub organization_slug: String,

    #[arg(long, env = "BUILDKITE_BUILD_ID", default_value = "", hide = true)]
    pub build_id: String,

    #[arg(long, env = "BUILDKITE_JOB_ID", default_value = "", hide = true)]
    pub job_id: String,

    #[arg(long, env = "BUILDKITE_STEP_ID", default_value = "", hide = true)]
    pub step_id: String,

    #[arg(long, env = "BUILDKITE_BRANCH", default_value = "", hide = true)]
    pub branch: String,

    #[arg(long, env = "BUILDKITE_RETRY_COUNT", default_value_t = 0, hide = true)]
    pub retry_count: usize,

    #[arg(long, env = "BUILDKITE_PARALLEL_JOB", default_value_t = 0, hide = true)]
    pub parallel_job: usize,

    /// Number of bktec processes running in parallel
    #[arg(long, env = "BUILDKITE_PARALLEL_JOB_COUNT", default_value_t = 0)]
    pub parallelism: usize,

    /// Buildkite API access token
    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_API_ACCESS_TOKEN",
        default_value = "",
        hide_env_values = true
    )]
    pub access_token: String,

    /// Test Engine suite slug
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_SUITE_SLUG", default_value = "")]
    pub suite_slug: String,

    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_BASE_URL",
        default_value = "https://api.buildkite.com",
        hide = true
    )]
    pub base_url: String,

    /// Test command
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_TEST_CMD", default_value = "")]
    pub test_command: String,

    /// Glob of test files to discover
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_TEST_FILE_PATTERN", default_value = "")]
    pub test_file_pattern: String,

    /// Glob of files and directories to leave out of discovery
    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_TEST_FILE_EXCLUDE_PATTERN",
        default_value = ""
    )]
    pub test_file_exclude_pattern: String,

    /// Test runner: rspec, jest, cypress, playwright, pytest, pytest-pants,
    /// gotest, cucumber or custom
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_TEST_RUNNER", default_value = "")]
    pub test_runner: String,

    /// Path of the report the test runner writes
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_RESULT_PATH", default_value = "")]
    pub result_path: String,

    /// Path prefix the runner adds to file locations in its report
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_LOCATION_PREFIX", default_value = "")]
    pub location_prefix: String,

    /// Split slow files into individual examples (RSpec and Cucumber)
    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_SPLIT_BY_EXAMPLE",
        action = ArgAction::Set,
        value_parser = parse_bool,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub split_by_example: bool,

    /// Fail when no tests are assigned to this node
    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_FAIL_ON_NO_TESTS",
        action = ArgAction::Set,
        value_parser = parse_bool,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub fail_on_no_tests: bool,

    /// Do not retry muted tests that fail
    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_DISABLE_RETRY_FOR_MUTED_TEST",
        action = ArgAction::Set,
        value_parser = parse_bool,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub disable_retry_muted: bool,

    /// Command used when retrying failed tests
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_RETRY_CMD", default_value = "")]
    pub retry_command: String,

    /// Number of times to retry failing tests
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_RETRY_COUNT", default_value_t = 0)]
    pub test_engine_retry_count: usize,

    /// Let the planner choose the parallelism, up to this value. Ignored
    /// when 0.
    #[arg(long, env = "BUILDKITE_TEST_ENGINE_MAX_PARALLELISM", default_value_t = 0)]
    pub max_parallelism: usize,

    /// Desired duration of the whole suite, e.g. 4m30s. Used together with
    /// --max-parallelism.
    #[arg(
        long,
        env = "BUILDKITE_TEST_ENGINE_TARGET_TIME",
        value_parser = parse_duration,
        default_value = "0s"
    )]
    pub target_time: Duration,
}

/// Parses the boolean spellings accepted in the environment.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "t" | "y" => Ok(true),
        "0" | "false" | "no" | "off" | "f" | "n" | "" => Ok(false),
        other => Err(format!("{:?} is not a valid boolean", other)),
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() || value == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(value).map_err(|e| format!("{:?}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ConfigArgs,
    }

    #[test]
    fn test_parse_bool() {
        for truthy in ["1", "true", "TRUE", "yes", "On", "t", "y"] {
            assert_eq!(parse_bool(truthy), Ok(true), "{}", truthy);
        }
        for falsy in ["0", "false", "No", "off", "f", "n", ""] {
            assert_eq!(parse_bool(falsy), Ok(false), "{}", falsy);
        }
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("4m30s"), Ok(Duration::from_secs(270)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_flags() {
        let harness = Harness::try_parse_from([
            "bktec",
            "--split-by-example",
            "--fail-on-no-tests=no",
            "--parallelism",
            "4",
            "--target-time",
            "90s",
            "--test-runner",
            "rspec",
        ])
        .unwrap();

        let args = harness.args;
        assert!(args.split_by_example);
        assert!(!args.fail_on_no_tests);
        assert!(!args.disable_retry_muted);
        assert_eq!(args.parallelism, 4);
        assert_eq!(args.target_time, Duration::from_secs(90));
        assert_eq!(args.test_runner, "rspec");
        assert_eq!(args.base_url, "https://api.buildkite.com");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        assert!(Harness::try_parse_from(["bktec", "--parallelism", "many"]).is_err());
    }
}
