//! Scripted runner used by the retry loop and orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{RunnerError, RunnerResult, SupportedFeatures, TestRunner};
use crate::executor::{RunResult, TestStatus};
use crate::plan::TestCase;

/// What one scripted attempt does.
pub enum Attempt {
    /// Records these outcomes and succeeds.
    Record(Vec<(TestCase, TestStatus)>),
    /// Fails the attempt with this error.
    Fail(RunnerError),
}

/// A runner whose attempts are scripted up front.
///
/// Every call to `run` pops the next [`Attempt`]; once the script runs out
/// the attempt records nothing. The cases passed to each call are kept for
/// assertions.
pub struct FakeRunner {
    files: Vec<String>,
    examples: Vec<TestCase>,
    features: SupportedFeatures,
    location_prefix: String,
    script: Mutex<VecDeque<Attempt>>,
    calls: Mutex<Vec<(Vec<TestCase>, bool)>>,
}

impl FakeRunner {
    pub fn new(script: Vec<Attempt>) -> Self {
        Self {
            files: Vec::new(),
            examples: Vec::new(),
            features: SupportedFeatures::default(),
            location_prefix: String::new(),
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_examples(mut self, examples: Vec<TestCase>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_features(mut self, features: SupportedFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_location_prefix(mut self, prefix: &str) -> Self {
        self.location_prefix = prefix.to_string();
        self
    }

    /// The cases and retry flag of every `run` call so far.
    pub fn calls(&self) -> Vec<(Vec<TestCase>, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestRunner for FakeRunner {
    fn name(&self) -> &str {
        "Fake"
    }

    fn supported_features(&self) -> SupportedFeatures {
        self.features
    }

    async fn get_files(&self) -> RunnerResult<Vec<String>> {
        Ok(self.files.clone())
    }

    async fn get_examples(&self, files: &[String]) -> RunnerResult<Vec<TestCase>> {
        Ok(self
            .examples
            .iter()
            .filter(|e| files.iter().any(|f| e.path.starts_with(f.as_str())))
            .cloned()
            .collect())
    }

    async fn run(
        &self,
        result: &mut RunResult,
        test_cases: &[TestCase],
        retry: bool,
    ) -> RunnerResult<()> {
        self.calls.lock().unwrap().push((test_cases.to_vec(), retry));
        let attempt = self.script.lock().unwrap().pop_front();
        match attempt {
            Some(Attempt::Record(outcomes)) => {
                for (case, status) in outcomes {
                    result.record_test_result(case, status);
                }
                Ok(())
            }
            Some(Attempt::Fail(e)) => Err(e),
            None => Ok(()),
        }
    }

    fn location_prefix(&self) -> &str {
        &self.location_prefix
    }
}
