//! Go adapter, driven through `gotestsum`.
//!
//! Packages are the unit of work: discovery lists them with `go list ./...`
//! and the planner shards them like files. Outcomes come from the JUnit XML
//! file `gotestsum --junitfile` writes, where each test case's `classname`
//! is its package import path.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::command::{PACKAGES, RESULT_PATH};
use super::{
    CommandSpec, CommandTemplate, ProcessResult, RunnerConfig, RunnerError, RunnerResult,
    ScratchDir, TestRunner, process, read_report, run_attempt, unparsed_report,
};
use crate::discovery::DiscoveryError;
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str = "gotestsum --junitfile={{resultPath}} {{packages}}";

#[derive(Debug, Default, Deserialize)]
struct JunitTestSuites {
    #[serde(rename = "testsuite", default)]
    suites: Vec<JunitTestSuite>,
}

#[derive(Debug, Default, Deserialize)]
struct JunitTestSuite {
    #[serde(rename = "testcase", default)]
    cases: Vec<JunitTestCase>,
}

#[derive(Debug, Deserialize)]
struct JunitTestCase {
    #[serde(rename = "@classname", default)]
    classname: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(default)]
    failure: Option<JunitMessage>,
    #[serde(default)]
    skipped: Option<JunitMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct JunitMessage {
    #[serde(rename = "@message", default)]
    _message: String,
}

impl JunitTestCase {
    fn status(&self) -> TestStatus {
        if self.failure.is_some() {
            TestStatus::Failed
        } else if self.skipped.is_some() {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        }
    }

    fn to_test_case(&self) -> TestCase {
        TestCase::example(&self.classname, &self.classname, &self.name)
    }
}

fn parse_junit(runner: &str, path: &str) -> RunnerResult<Vec<JunitTestCase>> {
    let data = read_report(runner, path)?;
    let suites: JunitTestSuites =
        quick_xml::de::from_str(&data).map_err(|e| RunnerError::ResultParse {
            runner: runner.to_string(),
            message: e.to_string(),
        })?;
    Ok(suites.suites.into_iter().flat_map(|s| s.cases).collect())
}

/// Distinct package paths of `test_cases`, in first-seen order.
fn packages(test_cases: &[TestCase]) -> Vec<String> {
    let mut seen = HashSet::new();
    test_cases
        .iter()
        .filter(|t| seen.insert(t.path.as_str()))
        .map(|t| t.path.clone())
        .collect()
}

pub struct GoTest {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl GoTest {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let config = config.or_defaults(DEFAULT_COMMAND, None, "", "");
        let scratch = ScratchDir::for_config(&config, "bktec-gotest-")?;
        let result_path = config.result_path_or(&scratch, "junit.xml");
        Ok(Self {
            config,
            result_path,
            _scratch: scratch,
        })
    }

    fn build_command(&self, template: &str, test_cases: &[TestCase]) -> RunnerResult<CommandSpec> {
        let packages = packages(test_cases);
        debug!("Packages: {:?}", packages);

        Ok(CommandTemplate::parse(template)?
            .splice_or_append(PACKAGES, &packages)
            .substitute(RESULT_PATH, &self.result_path)
            .build())
    }

    fn record(&self, result: &mut RunResult, outcome: ProcessResult<()>) -> RunnerResult<()> {
        if let Err(e) = &outcome
            && e.exit_code().is_some_and(|code| code != 1)
        {
            return outcome.map_err(RunnerError::from);
        }

        let cases = match parse_junit(self.name(), &self.result_path) {
            Ok(cases) => cases,
            Err(e) => return unparsed_report(self.name(), e, outcome),
        };

        for case in &cases {
            result.record_test_result(case.to_test_case(), case.status());
        }

        // A package that fails to build exits 1 without a failing test case.
        if let Err(e) = outcome
            && !cases.iter().any(|c| c.status() == TestStatus::Failed)
        {
            result.set_error(format!("{}, but no test failed; check the build output", e));
        }
        Ok(())
    }
}

#[async_trait]
impl TestRunner for GoTest {
    fn name(&self) -> &str {
        "gotest"
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        debug!("Discovering Go packages with `go list ./...`");
        let command = CommandSpec::new("go").args(["list", "./..."]);
        let output = process::run_captured(&command).await?;
        process::check_status("go", output.status).map_err(|e| {
            RunnerError::Discovery(DiscoveryError::PackageListing(format!(
                "{}\nstderr:\n{}",
                e,
                String::from_utf8_lossy(&output.stderr)
            )))
        })?;

        let packages: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!("Discovered {} packages", packages.len());

        if packages.is_empty() {
            return Err(RunnerError::Discovery(DiscoveryError::PackageListing(
                "no Go packages found using `go list ./...`".to_string(),
            )));
        }
        Ok(packages)
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
        let command = self.build_command(template, test_cases)?;
        let outcome = run_attempt(&command).await?;
        self.record(result, outcome)
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}
