//! Cucumber adapter.
//!
//! Outcomes come from Cucumber's JSON formatter. Scenarios are addressed as
//! `features/x.feature:LINE`, which Cucumber accepts on the command line, so
//! feature files can be split into scenarios through a `--dry-run`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::command::{RESULT_PATH, TEST_EXAMPLES};
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerError, RunnerResult, ScratchDir,
    SupportedFeatures, TestRunner, process, read_report, run_attempt, test_paths,
    unparsed_report,
};
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str =
    "cucumber --format pretty --format json --out {{resultPath}} {{testExamples}}";
const DEFAULT_PATTERN: &str = "features/**/*.feature";

#[derive(Debug, Deserialize)]
struct CucumberFeature {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    elements: Vec<CucumberElement>,
}

#[derive(Debug, Deserialize)]
struct CucumberElement {
    #[serde(default)]
    name: String,
    #[serde(default)]
    line: u32,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    steps: Vec<CucumberStep>,
}

#[derive(Debug, Deserialize)]
struct CucumberStep {
    #[serde(default)]
    result: Option<CucumberStepResult>,
}

#[derive(Debug, Deserialize)]
struct CucumberStepResult {
    #[serde(default)]
    status: String,
}

/// A report is normally an array of features, but some formatters emit a
/// single feature object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CucumberReport {
    Features(Vec<CucumberFeature>),
    Feature(CucumberFeature),
}

impl CucumberElement {
    fn is_scenario(&self) -> bool {
        self.kind == "scenario"
    }

    /// Folds the step results into one status. Any failing step fails the
    /// scenario; otherwise a pending or skipped step skips it.
    fn status(&self) -> TestStatus {
        let mut status = TestStatus::Passed;
        for result in self.steps.iter().filter_map(|s| s.result.as_ref()) {
            match result.status.as_str() {
                "failed" | "undefined" | "errored" => return TestStatus::Failed,
                "pending" | "skipped" => status = TestStatus::Skipped,
                _ => {}
            }
        }
        status
    }

    fn to_test_case(&self, feature: &CucumberFeature) -> TestCase {
        let location = format!("{}:{}", feature.uri, self.line);
        TestCase::example(&location, &feature.name, &self.name).with_identifier(&location)
    }
}

fn parse_features(runner: &str, path: &str) -> RunnerResult<Vec<CucumberFeature>> {
    let data = read_report(runner, path)?;
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }

    let report: CucumberReport =
        serde_json::from_str(&data).map_err(|e| RunnerError::ResultParse {
            runner: runner.to_string(),
            message: e.to_string(),
        })?;
    Ok(match report {
        CucumberReport::Features(features) => features,
        CucumberReport::Feature(feature) => vec![feature],
    })
}

/// Every scenario in `features` paired with its status.
fn scenarios(features: &[CucumberFeature]) -> Vec<(TestCase, TestStatus)> {
    features
        .iter()
        .flat_map(|feature| {
            feature
                .elements
                .iter()
                .filter(|e| e.is_scenario())
                .map(move |e| (e.to_test_case(feature), e.status()))
        })
        .collect()
}

pub struct Cucumber {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl Cucumber {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let config = config.or_defaults(DEFAULT_COMMAND, None, DEFAULT_PATTERN, "");
        let scratch = ScratchDir::for_config(&config, "bktec-cucumber-")?;
        let result_path = config.result_path_or(&scratch, "cucumber.json");
        Ok(Self {
            config,
            result_path,
            _scratch: scratch,
        })
    }

    fn build_command(&self, template: &str, paths: &[String]) -> RunnerResult<CommandSpec> {
        Ok(CommandTemplate::parse(template)?
            .splice_or_append(TEST_EXAMPLES, paths)
            .substitute(RESULT_PATH, &self.result_path)
            .build())
    }

    fn dry_run_command(&self, files: &[String], output: &str) -> RunnerResult<CommandSpec> {
        Ok(CommandTemplate::parse(&self.config.test_command)?
            .splice(TEST_EXAMPLES, &[])
            .substitute(RESULT_PATH, output)
            .append(["--dry-run", "--format", "json", "--out", output])
            .append(files.iter().cloned())
            .build())
    }
}

#[async_trait]
impl TestRunner for Cucumber {
    fn name(&self) -> &str {
        "Cucumber"
    }

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures {
            split_by_example: true,
            ..Default::default()
        }
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        self.config.discover_files()
    }

    async fn get_examples(&self, files: &[String]) -> RunnerResult<Vec<TestCase>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let dry_run = tempfile::Builder::new()
            .prefix("cucumber-dry-run-")
            .suffix(".json")
            .tempfile()?;
        let dry_run_path = dry_run.path().to_string_lossy().into_owned();
        let command = self.dry_run_command(files, &dry_run_path)?;

        debug!("Running Cucumber dry run: {}", command);
        let output = process::run_captured(&command).await?;
        if !output.status.success() {
            return Err(RunnerError::DryRun {
                runner: self.name().to_string(),
                output: format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let features = parse_features(self.name(), &dry_run_path)?;
        Ok(scenarios(&features).into_iter().map(|(case, _)| case).collect())
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

        let features = match parse_features(self.name(), &self.result_path) {
            Ok(features) => features,
            Err(e) => return unparsed_report(self.name(), e, outcome),
        };

        for (case, status) in scenarios(&features) {
            result.record_test_result(case, status);
        }
        Ok(())
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}
