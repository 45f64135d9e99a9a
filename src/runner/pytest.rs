//! pytest adapter.
//!
//! Outcomes are written by `buildkite-test-collector` through the `--json`
//! option it adds to pytest.

use async_trait::async_trait;

use super::command::{RESULT_PATH, TEST_EXAMPLES};
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerResult, ScratchDir, TestRunner,
    run_attempt, test_engine, test_paths,
};
use crate::executor::RunResult;
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str = "pytest {{testExamples}} --json={{resultPath}}";
const DEFAULT_PATTERN: &str = "**/{*_test,test_*}.py";

pub struct Pytest {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl Pytest {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let config = config.or_defaults(DEFAULT_COMMAND, None, DEFAULT_PATTERN, "");
        let scratch = ScratchDir::for_config(&config, "bktec-pytest-")?;
        let result_path = config.result_path_or(&scratch, "pytest-results.json");
        Ok(Self {
            config,
            result_path,
            _scratch: scratch,
        })
    }

    fn build_command(&self, template: &str, paths: &[String]) -> RunnerResult<CommandSpec> {
        let mut template = CommandTemplate::parse(template)?
            .splice_or_append(TEST_EXAMPLES, paths)
            .substitute(RESULT_PATH, &self.result_path);

        if !self.config.tag_filters.is_empty() {
            template = template.append(["-m".to_string(), self.config.tag_filters.clone()]);
        }
        Ok(template.build())
    }
}

#[async_trait]
impl TestRunner for Pytest {
    fn name(&self) -> &str {
        "pytest"
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        self.config.discover_files()
    }

    async fn run(
        &self,
        result: &mut RunResult,
        test_cases: &[TestCase],
        retry: bool,
    ) -> RunnerResult<()> {
        let template = if retry {
            &self.config.retry_test_command
        } else {
            &self.config.test_command
        };
        let command = self.build_command(template, &test_paths(test_cases))?;
        let outcome = run_attempt(&command).await?;

        test_engine::record_collector_report(self.name(), &self.result_path, outcome, result)
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}
