//! pytest under Pants.
//!
//! Pants owns target selection, so this adapter discovers no files and
//! never injects test paths. The user's command must forward the collector
//! options to pytest after the `--` separator:
//!
//! ```text
//! pants test //:: -- --json={{resultPath}} --merge-json
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use super::command::{RESULT_PATH, TEST_EXAMPLES};
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerError, RunnerResult, ScratchDir,
    TestRunner, run_attempt, test_engine,
};
use crate::executor::RunResult;
use crate::plan::TestCase;

pub struct PytestPants {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl PytestPants {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        info!(
            "Python package 'buildkite-test-collector' is required and will not be verified \
             by bktec. Please ensure it is added to the pants resolve used by pytest."
        );

        if config.test_command.is_empty() {
            return Err(RunnerError::InvalidConfig(
                "the test command must be set via BUILDKITE_TEST_ENGINE_TEST_CMD".to_string(),
            ));
        }

        if !config.test_file_pattern.is_empty() || !config.test_file_exclude_pattern.is_empty() {
            warn!(
                "Pants test runner variant does not support discovering test files, \
                 ignoring BUILDKITE_TEST_ENGINE_TEST_FILE_PATTERN={:?} and \
                 BUILDKITE_TEST_ENGINE_TEST_FILE_EXCLUDE_PATTERN={:?}",
                config.test_file_pattern, config.test_file_exclude_pattern
            );
        }

        let command = config.test_command.clone();
        let config = config.or_defaults(&command, None, "", "");
        let scratch = ScratchDir::for_config(&config, "bktec-pytest-pants-")?;
        let result_path = config.result_path_or(&scratch, "pytest-results.json");
        Ok(Self {
            config,
            result_path,
            _scratch: scratch,
        })
    }

    fn build_command(&self, template: &str) -> RunnerResult<CommandSpec> {
        let invalid = |message: &str| {
            Err(RunnerError::CommandBuild(format!(
                "please ensure the test command in BUILDKITE_TEST_ENGINE_TEST_CMD {}",
                message
            )))
        };

        let parsed = CommandTemplate::parse(template)?;
        if parsed.contains(TEST_EXAMPLES) {
            return invalid("does *not* include {{testExamples}}");
        }

        let words = parsed.words();
        let Some(separator) = words.iter().position(|w| w == "--") else {
            return invalid("includes a -- separator");
        };
        let pytest_args = &words[separator + 1..];
        if !pytest_args.iter().any(|w| w == "--json={{resultPath}}") {
            return invalid("includes --json={{resultPath}} after the -- separator");
        }
        if !pytest_args.iter().any(|w| w == "--merge-json") {
            return invalid("includes --merge-json after the -- separator");
        }

        Ok(parsed.substitute(RESULT_PATH, &self.result_path).build())
    }
}

#[async_trait]
impl TestRunner for PytestPants {
    fn name(&self) -> &str {
        "pytest-pants"
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn run(
        &self,
        result: &mut RunResult,
        _test_cases: &[TestCase],
        retry: bool,
    ) -> RunnerResult<()> {
        let template = if retry {
            &self.config.retry_test_command
        } else {
            &self.config.test_command
        };
        let command = self.build_command(template)?;
        let outcome = run_attempt(&command).await?;

        test_engine::record_collector_report(self.name(), &self.result_path, outcome, result)
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMAND: &str = "pants test //:: -- --json={{resultPath}} --merge-json";

    fn adapter() -> PytestPants {
        PytestPants::new(
            RunnerConfig::new("pytest-pants")
                .with_test_command(COMMAND)
                .with_result_path("out.json"),
        )
        .unwrap()
    }

    #[test]
    fn test_command_is_required() {
        let err = PytestPants::new(RunnerConfig::new("pytest-pants")).err().unwrap();
        assert!(matches!(err, RunnerError::InvalidConfig(_)));
    }

    #[test]
    fn test_valid_command() {
        let command = adapter().build_command(COMMAND).unwrap();
        assert_eq!(command.program, "pants");
        assert_eq!(
            command.args,
            vec!["test", "//::", "--", "--json=out.json", "--merge-json"]
        );
    }

    #[test]
    fn test_command_validation() {
        let pants = adapter();
        for (command, expected) in [
            ("pants test //:: --json={{resultPath}}", "-- separator"),
            ("pants test //:: -- --merge-json", "--json={{resultPath}}"),
            ("pants test //:: -- --json={{resultPath}}", "--merge-json"),
            (
                "pants test {{testExamples}} -- --json={{resultPath}} --merge-json",
                "{{testExamples}}",
            ),
        ] {
            let err = pants.build_command(command).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{} should mention {}: {}",
                command,
                expected,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_no_discovery() {
        let pants = adapter();
        assert!(pants.get_files().await.unwrap().is_empty());
        assert!(!pants.supported_features().split_by_example);
    }
}
