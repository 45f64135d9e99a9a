//! RSpec adapter.
//!
//! Outcomes are read from RSpec's JSON formatter, which the default command
//! writes to `{{resultPath}}` alongside the usual progress output. RSpec can
//! address individual examples (`./spec/a_spec.rb[1:2]`), so files can be
//! split into examples through a `--dry-run`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::command::{RESULT_PATH, TEST_EXAMPLES};
use super::{
    CommandSpec, CommandTemplate, ProcessResult, RunnerConfig, RunnerError, RunnerResult,
    ScratchDir, SupportedFeatures, TestRunner, parse_json_report, process, run_attempt,
    test_paths, unparsed_report,
};
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str =
    "bundle exec rspec --format progress --format json --out {{resultPath}} {{testExamples}}";
const DEFAULT_PATTERN: &str = "spec/**/*_spec.rb";

#[derive(Debug, Deserialize)]
struct RspecReport {
    #[serde(default)]
    examples: Vec<RspecExample>,
}

#[derive(Debug, Deserialize)]
struct RspecExample {
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    full_description: String,
    #[serde(default)]
    status: String,
}

impl RspecExample {
    fn to_test_case(&self) -> TestCase {
        let scope = self
            .full_description
            .strip_suffix(&format!(" {}", self.description))
            .unwrap_or(&self.full_description);
        TestCase::example(&self.id, scope, &self.description).with_identifier(&self.id)
    }

    fn status(&self) -> TestStatus {
        match self.status.as_str() {
            "passed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        }
    }
}

pub struct Rspec {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl Rspec {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let config = config.or_defaults(DEFAULT_COMMAND, None, DEFAULT_PATTERN, "");
        let scratch = ScratchDir::for_config(&config, "bktec-rspec-")?;
        let result_path = config.result_path_or(&scratch, "rspec.json");
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
}

#[async_trait]
impl TestRunner for Rspec {
    fn name(&self) -> &str {
        "RSpec"
    }

    fn supported_features(&self) -> SupportedFeatures {
        SupportedFeatures {
            split_by_example: true,
            ..Default::default()
        }
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        let files = self.config.discover_files()?;
        Ok(files.into_iter().map(|f| format!("./{}", f)).collect())
    }

    async fn get_examples(&self, files: &[String]) -> RunnerResult<Vec<TestCase>> {
        let dry_run = tempfile::Builder::new()
            .prefix("dry-run-")
            .suffix(".json")
            .tempfile()?;
        let dry_run_path = dry_run.path().to_string_lossy().into_owned();

        let command = self
            .build_command(&self.config.test_command, files)?
            .args(["--dry-run", "--format", "json", "--out"])
            .arg(dry_run_path.as_str())
            .args(["--format", "progress"]);

        debug!("Running `{}` for dry run", command);
        let output = process::run_captured(&command).await?;
        if !output.status.success() {
            return Err(RunnerError::DryRun {
                runner: self.name().to_string(),
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }

        let report: RspecReport = parse_json_report(self.name(), &dry_run_path)?;
        Ok(report.examples.iter().map(RspecExample::to_test_case).collect())
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
        self.record(result, outcome)
    }

    fn location_prefix(&self) -> &str {
        &self.config.location_prefix
    }
}

impl Rspec {
    fn record(&self, result: &mut RunResult, outcome: ProcessResult<()>) -> RunnerResult<()> {
        let report: RspecReport = match parse_json_report(self.name(), &self.result_path) {
            Ok(report) => report,
            Err(e) => return unparsed_report(self.name(), e, outcome),
        };

        for example in &report.examples {
            result.record_test_result(example.to_test_case(), example.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "version": "3.13.0",
        "examples": [
            {"id": "./spec/fruit_spec.rb[1:1]", "description": "is red",
             "full_description": "Fruit apple is red", "status": "passed",
             "file_path": "./spec/fruit_spec.rb", "line_number": 3},
            {"id": "./spec/fruit_spec.rb[1:2]", "description": "is yellow",
             "full_description": "Fruit banana is yellow", "status": "failed",
             "file_path": "./spec/fruit_spec.rb", "line_number": 7},
            {"id": "./spec/fruit_spec.rb[1:3]", "description": "is ripe",
             "full_description": "Fruit cherry is ripe", "status": "pending",
             "file_path": "./spec/fruit_spec.rb", "line_number": 11}
        ]
    }"#;

    #[test]
    fn test_defaults() {
        let rspec = Rspec::new(RunnerConfig::new("rspec")).unwrap();
        assert_eq!(rspec.config.test_command, DEFAULT_COMMAND);
        assert_eq!(rspec.config.retry_test_command, DEFAULT_COMMAND);
        assert_eq!(rspec.config.test_file_pattern, DEFAULT_PATTERN);
        assert!(rspec.result_path.ends_with("rspec.json"));
        assert!(rspec.supported_features().split_by_example);
    }

    #[test]
    fn test_command_substitution() {
        let rspec = Rspec::new(RunnerConfig::new("rspec").with_result_path("out.json")).unwrap();
        let command = rspec
            .build_command(DEFAULT_COMMAND, &["./spec/a_spec.rb".to_string()])
            .unwrap();
        assert_eq!(
            command.to_string(),
            "bundle exec rspec --format progress --format json --out out.json ./spec/a_spec.rb"
        );
    }

    #[test]
    fn test_example_mapping() {
        let report: RspecReport = serde_json::from_str(REPORT).unwrap();
        let case = report.examples[0].to_test_case();
        assert_eq!(case.path, "./spec/fruit_spec.rb[1:1]");
        assert_eq!(case.identifier, "./spec/fruit_spec.rb[1:1]");
        assert_eq!(case.scope, "Fruit apple");
        assert_eq!(case.name, "is red");
        assert_eq!(report.examples[2].status(), TestStatus::Skipped);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_run_records_outcomes_despite_failing_exit() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("rspec.json");
        std::fs::write(&report, REPORT).unwrap();

        let rspec = Rspec::new(
            RunnerConfig::new("rspec")
                .with_test_command("sh -c 'exit 1' {{testExamples}}")
                .with_result_path(report.to_str().unwrap()),
        )
        .unwrap();

        let mut result = RunResult::new(&[]);
        rspec
            .run(&mut result, &[TestCase::file("./spec/fruit_spec.rb")], false)
            .await
            .unwrap();

        let stats = result.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(result.failed_tests()[0].name, "is yellow");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_missing_report_surfaces_exit_error() {
        let dir = tempfile::tempdir().unwrap();
        let rspec = Rspec::new(
            RunnerConfig::new("rspec")
                .with_test_command("sh -c 'exit 2'")
                .with_result_path(dir.path().join("absent.json").to_str().unwrap()),
        )
        .unwrap();

        let mut result = RunResult::new(&[]);
        let err = rspec.run(&mut result, &[], false).await.unwrap_err();
        assert!(matches!(err, RunnerError::Process(_)));
        assert!(result.is_empty());
    }
}
