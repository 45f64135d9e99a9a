//! Cypress adapter.
//!
//! Cypress takes its specs as a single comma-separated `--spec` value and
//! produces no report this client reads, so the exit status is the only
//! signal and failed specs are not retried individually.

use async_trait::async_trait;

use super::command::TEST_EXAMPLES;
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerResult, TestRunner, run_and_forward_signal,
    test_paths,
};
use crate::executor::RunResult;
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str = "npx cypress run --spec {{testExamples}}";
const DEFAULT_PATTERN: &str = "**/*.cy.{js,jsx,ts,tsx}";

pub struct Cypress {
    config: RunnerConfig,
}

impl Cypress {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: config.or_defaults(DEFAULT_COMMAND, None, DEFAULT_PATTERN, ""),
        }
    }

    fn build_command(&self, test_cases: &[TestCase]) -> RunnerResult<CommandSpec> {
        let specs = test_paths(test_cases).join(",");
        let template = CommandTemplate::parse(&self.config.test_command)?;

        let template = if template.contains(TEST_EXAMPLES) {
            template.substitute(TEST_EXAMPLES, &specs)
        } else {
            template.append(["--spec".to_string(), specs])
        };
        Ok(template.build())
    }
}

#[async_trait]
impl TestRunner for Cypress {
    fn name(&self) -> &str {
        "Cypress"
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        self.config.discover_files()
    }

    async fn run(
        &self,
        _result: &mut RunResult,
        test_cases: &[TestCase],
        _retry: bool,
    ) -> RunnerResult<()> {
        let command = self.build_command(test_cases)?;
        run_and_forward_signal(&command).await?;
        Ok(())
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}
