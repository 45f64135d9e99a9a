//! Request and response bodies of the test plan endpoints.

use serde::{Deserialize, Serialize};

use crate::executor::{RunStatistics, TimelineEvent};
use crate::plan::TestCase;

/// Tests offered to the service when creating a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlanTests {
    /// Whole files, planned as units.
    #[serde(default)]
    pub files: Vec<TestCase>,
    /// Individual examples of files the service asked to split.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<TestCase>,
}

/// Body of `POST .../test_plan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlanParams {
    pub identifier: String,
    pub parallelism: usize,
    pub max_parallelism: usize,
    /// Target duration of each node, in seconds.
    pub target_time: f64,
    pub branch: String,
    pub runner: String,
    pub tests: TestPlanTests,
}

/// Body of `POST .../test_plan/filter_tests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterTestsParams {
    pub files: Vec<TestCase>,
    pub parallelism: usize,
    pub split_by_example: bool,
    pub env: serde_json::Value,
}

/// A file the service wants split into examples.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilteredTest {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FilterTestsResponse {
    #[serde(default)]
    pub tests: Vec<FilteredTest>,
}

/// Body of `POST .../test_plan_metadata`, sent once the run finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestPlanMetadata {
    pub version: String,
    pub env: serde_json::Value,
    pub timeline: Vec<TimelineEvent>,
    pub statistics: RunStatistics,
}
