//! Custom runner adapter.
//!
//! Runs an arbitrary user-supplied command. When a result path is
//! configured, the command is expected to write the generic Test Engine JSON
//! format there; otherwise only its exit status is known.

use async_trait::async_trait;

use super::command::{RESULT_PATH, TEST_EXAMPLES};
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerError, RunnerResult, SupportedFeatures,
    TestRunner, run_attempt, test_engine, test_paths,
};
use crate::executor::RunResult;
use crate::plan::TestCase;

pub struct Custom {
    config: RunnerConfig,
}

impl Custom {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        if config.test_command.is_empty() {
            return Err(RunnerError::InvalidConfig(
                "test command must be provided for custom runner".to_string(),
            ));
        }
        if config.test_file_pattern.is_empty() {
            return Err(RunnerError::InvalidConfig(
                "test file pattern must be provided for custom runner".to_string(),
            ));
        }

        let command = config.test_command.clone();
        Ok(Self {
            config: config.or_defaults(&command, None, "", ""),
        })
    }

    fn build_command(&self, test_cases: &[TestCase]) -> RunnerResult<CommandSpec> {
        Ok(CommandTemplate::parse(&self.config.test_command)?
            .splice(TEST_EXAMPLES, &test_paths(test_cases))
            .substitute(RESULT_PATH, &self.config.result_path)
            .build())
    }
}

#[async_trait]
impl TestRunner for Custom {
    fn name(&self) -> &str {
        "Custom test runner"
    }

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures {
            auto_retry: false,
            ..Default::default()
        }
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        self.config.discover_files()
    }

    async fn get_examples(&self, _files: &[String]) -> RunnerResult<Vec<TestCase>> {
        Err(RunnerError::NotSupported(
            "not supported for custom runner".to_string(),
        ))
    }

    async fn run(
        &self,
        result: &mut RunResult,
        test_cases: &[TestCase],
        retry: bool,
    ) -> RunnerResult<()> {
        if retry {
            return Err(RunnerError::NotSupported(
                "retrying failed tests is not supported for custom runner".to_string(),
            ));
        }

        let command = self.build_command(test_cases)?;
        let outcome = run_attempt(&command).await?;

        if self.config.result_path.is_empty() {
            return outcome.map_err(RunnerError::from);
        }

        let tests = match test_engine::parse_report(self.name(), &self.config.result_path) {
            Ok(tests) => tests,
            Err(e) => {
                tracing::warn!("{}", e);
                return outcome.map_err(RunnerError::from);
            }
        };

        for test in &tests {
            result.record_test_result(test.to_test_case(), test.status());
        }
        Ok(())
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}
