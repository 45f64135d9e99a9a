//! The generic Test Engine result format.
//!
//! Produced by the Buildkite test collectors (e.g. `buildkite-test-collector`
//! for pytest) and accepted from custom runners:
//!
//! ```json
//! [{"id": "...", "scope": "tests/test_fruit.py", "name": "test_apple",
//!   "location": "tests/test_fruit.py:12", "file_name": "tests/test_fruit.py",
//!   "result": "passed"}]
//! ```

use serde::Deserialize;

use super::{ProcessResult, RunnerError, RunnerResult, parse_json_report, unparsed_report};
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

/// One entry of a Test Engine JSON report.
#[derive(Debug, Clone, Deserialize)]
pub struct TestEngineTest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub result: String,
}

impl TestEngineTest {
    pub fn status(&self) -> TestStatus {
        match self.result.as_str() {
            "passed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            _ => TestStatus::Skipped,
        }
    }

    /// Maps the entry to an example-format case addressed as `scope::name`.
    pub fn to_test_case(&self) -> TestCase {
        TestCase::example(
            format!("{}::{}", self.scope, self.name),
            &self.scope,
            &self.name,
        )
        .with_identifier(&self.id)
    }
}

/// Reads a Test Engine JSON report.
pub fn parse_report(runner: &str, path: &str) -> RunnerResult<Vec<TestEngineTest>> {
    parse_json_report(runner, path)
}

/// Records a collector report written by a pytest-style run.
///
/// Exit status 1 means "some tests failed" and the report is trusted. Any
/// other failure is returned without reading the report.
pub(super) fn record_collector_report(
    runner: &str,
    path: &str,
    outcome: ProcessResult<()>,
    result: &mut RunResult,
) -> RunnerResult<()> {
    if let Err(e) = &outcome
        && e.exit_code().is_some_and(|code| code != 1)
    {
        return outcome.map_err(RunnerError::from);
    }

    let tests = match parse_report(runner, path) {
        Ok(tests) => tests,
        Err(e) => return unparsed_report(runner, e, outcome),
    };

    for test in &tests {
        result.record_test_result(test.to_test_case(), test.status());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "1", "scope": "tests/test_fruit.py", "name": "test_apple",
                 "location": "tests/test_fruit.py:3", "file_name": "tests/test_fruit.py",
                 "result": "passed", "history": {"duration": 0.1}},
                {"id": "2", "scope": "tests/test_fruit.py", "name": "test_banana", "result": "failed"},
                {"id": "3", "scope": "tests/test_fruit.py", "name": "test_cherry", "result": "skipped"}
            ]"#,
        )
        .unwrap();

        let tests = parse_report("pytest", path.to_str().unwrap()).unwrap();
        let statuses: Vec<TestStatus> = tests.iter().map(TestEngineTest::status).collect();
        assert_eq!(
            statuses,
            vec![TestStatus::Passed, TestStatus::Failed, TestStatus::Skipped]
        );

        let case = tests[0].to_test_case();
        assert_eq!(case.path, "tests/test_fruit.py::test_apple");
        assert_eq!(case.identifier, "1");
        assert_eq!(case.key(), "tests/test_fruit.py/test_apple");
    }

    #[test]
    fn test_collector_report_rescues_only_exit_code_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(
            &path,
            r#"[{"id": "1", "scope": "t.py", "name": "test_a", "result": "failed"}]"#,
        )
        .unwrap();
        let path = path.to_str().unwrap();

        let mut result = RunResult::new(&[]);
        let failed = |code| {
            Err(crate::runner::ProcessError::Exited {
                program: "pytest".to_string(),
                code,
            })
        };

        record_collector_report("pytest", path, failed(1), &mut result).unwrap();
        assert_eq!(result.failed_tests().len(), 1);

        let mut result = RunResult::new(&[]);
        let err = record_collector_report("pytest", path, failed(4), &mut result).unwrap_err();
        assert_eq!(err.to_string(), "`pytest` exited with status 4");
        assert!(result.is_empty());
    }

    #[test]
    fn test_malformed_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = parse_report("pytest", path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse pytest output"));
    }
}
