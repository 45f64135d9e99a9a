//! Jest adapter.
//!
//! The first attempt runs whole files. Jest cannot address a single test by
//! location, so retries select the failed tests by name through
//! `--testNamePattern` instead.

use async_trait::async_trait;
use serde::Deserialize;

use super::command::{RESULT_PATH, TEST_EXAMPLES, TEST_NAME_PATTERN, test_name_pattern};
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerResult, ScratchDir, TestRunner,
    parse_json_report, run_attempt, test_paths, unparsed_report,
};
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str =
    "yarn test {{testExamples}} --json --testLocationInResults --outputFile {{resultPath}}";
const DEFAULT_RETRY_COMMAND: &str = "yarn test --testNamePattern '{{testNamePattern}}' --json \
     --testLocationInResults --outputFile {{resultPath}}";
const DEFAULT_PATTERN: &str = "**/{__tests__/**/*,*.spec,*.test}.{ts,js,tsx,jsx}";
const DEFAULT_EXCLUDE: &str = "node_modules";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    #[serde(default)]
    test_results: Vec<JestTestResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestTestResult {
    #[serde(default)]
    assertion_results: Vec<JestAssertion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestAssertion {
    full_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    ancestor_titles: Vec<String>,
    #[serde(default)]
    status: String,
}

impl JestAssertion {
    fn to_test_case(&self) -> TestCase {
        TestCase::example(&self.full_name, self.ancestor_titles.join(" "), &self.title)
            .with_identifier(&self.full_name)
    }

    fn status(&self) -> Option<TestStatus> {
        match self.status.as_str() {
            "passed" => Some(TestStatus::Passed),
            "failed" => Some(TestStatus::Failed),
            "pending" | "skipped" | "todo" | "disabled" => Some(TestStatus::Skipped),
            _ => None,
        }
    }
}

pub struct Jest {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl Jest {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let config = config.or_defaults(
            DEFAULT_COMMAND,
            Some(DEFAULT_RETRY_COMMAND),
            DEFAULT_PATTERN,
            DEFAULT_EXCLUDE,
        );
        let scratch = ScratchDir::for_config(&config, "bktec-jest-")?;
        let result_path = config.result_path_or(&scratch, "jest.json");
        Ok(Self {
            config,
            result_path,
            _scratch: scratch,
        })
    }

    fn build_command(&self, test_cases: &[TestCase], retry: bool) -> RunnerResult<CommandSpec> {
        if retry {
            let names: Vec<&str> = test_cases.iter().map(|t| t.path.as_str()).collect();
            return Ok(CommandTemplate::parse(&self.config.retry_test_command)?
                .require(TEST_NAME_PATTERN, &test_name_pattern(&names))?
                .require(RESULT_PATH, &self.result_path)?
                .build());
        }

        Ok(CommandTemplate::parse(&self.config.test_command)?
            .splice_or_append(TEST_EXAMPLES, &test_paths(test_cases))
            .require(RESULT_PATH, &self.result_path)?
            .build())
    }
}

#[async_trait]
impl TestRunner for Jest {
    fn name(&self) -> &str {
        "Jest"
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
        let command = self.build_command(test_cases, retry)?;
        let outcome = run_attempt(&command).await?;

        let report: JestReport = match parse_json_report(self.name(), &self.result_path) {
            Ok(report) => report,
            Err(e) => return unparsed_report(self.name(), e, outcome),
        };

        for assertion in report.test_results.iter().flat_map(|r| &r.assertion_results) {
            if let Some(status) = assertion.status() {
                result.record_test_result(assertion.to_test_case(), status);
            }
        }
        Ok(())
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerError;

    fn adapter(config: RunnerConfig) -> Jest {
        Jest::new(config.with_result_path("jest.json")).unwrap()
    }

    #[test]
    fn test_first_run_command() {
        let jest = adapter(RunnerConfig::new("jest"));
        let command = jest
            .build_command(&[TestCase::file("src/fruit.spec.js")], false)
            .unwrap();
        assert_eq!(
            command.to_string(),
            "yarn test src/fruit.spec.js --json --testLocationInResults --outputFile jest.json"
        );
    }

    #[test]
    fn test_retry_command_uses_name_pattern() {
        let jest = adapter(RunnerConfig::new("jest"));
        let failed = [
            TestCase::example("Fruit apple is red", "Fruit apple", "is red"),
            TestCase::example("Fruit banana (ripe)", "Fruit", "banana (ripe)"),
        ];
        let command = jest.build_command(&failed, true).unwrap();
        assert_eq!(
            command.args,
            vec![
                "test",
                "--testNamePattern",
                "(Fruit apple is red|Fruit banana \\(ripe\\))",
                "--json",
                "--testLocationInResults",
                "--outputFile",
                "jest.json"
            ]
        );
    }

    #[test]
    fn test_result_path_placeholder_is_required() {
        let jest = adapter(RunnerConfig::new("jest").with_test_command("yarn test"));
        let err = jest.build_command(&[], false).unwrap_err();
        assert!(matches!(err, RunnerError::CommandBuild(_)));

        let jest = adapter(
            RunnerConfig::new("jest")
                .with_retry_test_command("yarn test --outputFile {{resultPath}}"),
        );
        let err = jest.build_command(&[], true).unwrap_err();
        assert!(err.to_string().contains("{{testNamePattern}}"));
    }

    #[test]
    fn test_assertion_mapping() {
        let report: JestReport = serde_json::from_str(
            r#"{
                "numFailedTests": 1,
                "testResults": [{
                    "name": "/repo/src/fruit.spec.js",
                    "assertionResults": [
                        {"fullName": "Fruit apple is red", "title": "is red",
                         "ancestorTitles": ["Fruit", "apple"], "status": "passed",
                         "location": {"line": 3, "column": 5}},
                        {"fullName": "Fruit banana is yellow", "title": "is yellow",
                         "ancestorTitles": ["Fruit", "banana"], "status": "todo"}
                    ]
                }]
            }"#,
        )
        .unwrap();

        let assertions = &report.test_results[0].assertion_results;
        let case = assertions[0].to_test_case();
        assert_eq!(case.scope, "Fruit apple");
        assert_eq!(case.name, "is red");
        assert_eq!(case.path, "Fruit apple is red");
        assert_eq!(assertions[1].status(), Some(TestStatus::Skipped));
    }
}
