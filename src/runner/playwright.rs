//! Playwright adapter.
//!
//! Outcomes come from Playwright's JSON reporter. The reporter writes to
//! the file named by `PLAYWRIGHT_JSON_OUTPUT_NAME`, which this adapter points
//! at the result path; the project's reporter configuration must include
//! `json` for the file to be produced.

use async_trait::async_trait;
use serde::Deserialize;

use super::command::{RESULT_PATH, TEST_EXAMPLES};
use super::{
    CommandSpec, CommandTemplate, RunnerConfig, RunnerResult, ScratchDir, TestRunner,
    parse_json_report, run_attempt, test_paths, unparsed_report,
};
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

const DEFAULT_COMMAND: &str = "npx playwright test {{testExamples}}";
const DEFAULT_PATTERN: &str = "**/{*.spec,*.test}.{ts,js}";
const DEFAULT_EXCLUDE: &str = "**/node_modules";

const OUTPUT_ENV: &str = "PLAYWRIGHT_JSON_OUTPUT_NAME";

#[derive(Debug, Default, Deserialize)]
struct PlaywrightReport {
    #[serde(default)]
    suites: Vec<PlaywrightSuite>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaywrightSuite {
    #[serde(default)]
    title: String,
    #[serde(default)]
    specs: Vec<PlaywrightSpec>,
    #[serde(default)]
    suites: Vec<PlaywrightSuite>,
}

#[derive(Debug, Deserialize)]
struct PlaywrightSpec {
    #[serde(default)]
    title: String,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    tests: Vec<PlaywrightTest>,
}

#[derive(Debug, Deserialize)]
struct PlaywrightTest {
    #[serde(default)]
    status: String,
}

impl PlaywrightSpec {
    fn status(&self) -> TestStatus {
        if !self.ok {
            TestStatus::Failed
        } else if !self.tests.is_empty() && self.tests.iter().all(|t| t.status == "skipped") {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        }
    }
}

/// Flattens the suite tree into `(case, status)` pairs, scoping each spec by
/// the titles of its enclosing suites.
fn collect_specs(
    suites: &[PlaywrightSuite],
    parents: &mut Vec<String>,
    out: &mut Vec<(TestCase, TestStatus)>,
) {
    for suite in suites {
        let titled = !suite.title.is_empty();
        if titled {
            parents.push(suite.title.clone());
        }

        for spec in &suite.specs {
            let location = format!("{}:{}", spec.file, spec.line);
            let case = TestCase::example(&location, parents.join(" "), &spec.title)
                .with_identifier(&location);
            out.push((case, spec.status()));
        }
        collect_specs(&suite.suites, parents, out);

        if titled {
            parents.pop();
        }
    }
}

pub struct Playwright {
    config: RunnerConfig,
    result_path: String,
    _scratch: ScratchDir,
}

impl Playwright {
    pub fn new(config: RunnerConfig) -> RunnerResult<Self> {
        let config = config.or_defaults(DEFAULT_COMMAND, None, DEFAULT_PATTERN, DEFAULT_EXCLUDE);
        let scratch = ScratchDir::for_config(&config, "bktec-playwright-")?;
        let result_path = config.result_path_or(&scratch, "playwright.json");
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
            .build()
            .env(OUTPUT_ENV, &self.result_path))
    }
}

#[async_trait]
impl TestRunner for Playwright {
    fn name(&self) -> &str {
        "Playwright"
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

        let report: PlaywrightReport = match parse_json_report(self.name(), &self.result_path) {
            Ok(report) => report,
            Err(e) => return unparsed_report(self.name(), e, outcome),
        };

        let mut specs = Vec::new();
        collect_specs(&report.suites, &mut Vec::new(), &mut specs);
        for (case, status) in specs {
            result.record_test_result(case, status);
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

    const REPORT: &str = r#"{
        "config": {},
        "suites": [{
            "title": "fruits.spec.ts",
            "file": "fruits.spec.ts",
            "specs": [
                {"title": "has title", "ok": true, "file": "fruits.spec.ts", "line": 3,
                 "tests": [{"status": "expected"}]}
            ],
            "suites": [{
                "title": "apple",
                "specs": [
                    {"title": "is red", "ok": false, "file": "fruits.spec.ts", "line": 8,
                     "tests": [{"status": "unexpected"}]},
                    {"title": "is crunchy", "ok": true, "file": "fruits.spec.ts", "line": 12,
                     "tests": [{"status": "skipped"}]}
                ]
            }]
        }],
        "stats": {"expected": 1, "unexpected": 1, "skipped": 1}
    }"#;

    #[test]
    fn test_nested_suites_are_flattened() {
        let report: PlaywrightReport = serde_json::from_str(REPORT).unwrap();
        let mut specs = Vec::new();
        collect_specs(&report.suites, &mut Vec::new(), &mut specs);

        let summary: Vec<(&str, &str, TestStatus)> = specs
            .iter()
            .map(|(c, s)| (c.path.as_str(), c.scope.as_str(), *s))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("fruits.spec.ts:3", "fruits.spec.ts", TestStatus::Passed),
                ("fruits.spec.ts:8", "fruits.spec.ts apple", TestStatus::Failed),
                ("fruits.spec.ts:12", "fruits.spec.ts apple", TestStatus::Skipped),
            ]
        );
        assert_eq!(specs[1].0.identifier, "fruits.spec.ts:8");
        assert_eq!(specs[1].0.name, "is red");
    }

    #[test]
    fn test_result_path_is_exported() {
        let playwright =
            Playwright::new(RunnerConfig::new("playwright").with_result_path("pw.json")).unwrap();
        let command = playwright
            .build_command(DEFAULT_COMMAND, &["tests/a.spec.ts".to_string()])
            .unwrap();
        assert_eq!(command.to_string(), "npx playwright test tests/a.spec.ts");
        assert_eq!(command.env.get(OUTPUT_ENV).map(String::as_str), Some("pw.json"));
    }
}
