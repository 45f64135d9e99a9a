//! Test plan data model.
//!
//! A [`TestPlan`] maps each node of a parallel build to the [`Task`] it must
//! execute. Plans come from the planning service or, when the service cannot
//! be reached, from the deterministic [`fallback`] planner.
//!
//! ```text
//! TestPlan
//!   ├── tasks: {"0": Task, "1": Task, ...}
//!   │              └── tests: [TestCase, ...]
//!   ├── muted_tests:   [TestCase, ...]   (failures do not fail the build)
//!   ├── skipped_tests: [TestCase, ...]   (skipped by the service)
//!   └── fallback / identifier / parallelism
//! ```
//!
//! # Wire compatibility
//!
//! The canonical encoding uses snake_case keys. Older service responses used
//! PascalCase keys (`Path`, `Identifier`, ...); those are accepted on input
//! through serde aliases and never produced on output.

pub mod fallback;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use fallback::create_fallback_plan;

/// Granularity of a [`TestCase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFormat {
    /// A whole test file (or Go package).
    #[default]
    #[serde(alias = "File")]
    File,
    /// A single example within a file.
    #[serde(alias = "Example")]
    Example,
}

impl TestFormat {
    fn is_file(&self) -> bool {
        *self == TestFormat::File
    }
}

/// Identifies one test, either a file or an individual example.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestCase {
    /// Locator the runner accepts to execute this case in isolation.
    #[serde(alias = "Path")]
    pub path: String,

    /// Runner-specific identifier, e.g. an RSpec example id.
    #[serde(default, alias = "Identifier", skip_serializing_if = "String::is_empty")]
    pub identifier: String,

    /// Leaf label, e.g. the example description.
    #[serde(default, alias = "Name", skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Enclosing label, e.g. the file, class or feature.
    #[serde(default, alias = "Scope", skip_serializing_if = "String::is_empty")]
    pub scope: String,

    #[serde(default, alias = "Format", skip_serializing_if = "TestFormat::is_file")]
    pub format: TestFormat,

    /// Estimated duration in microseconds, as reported by the service.
    #[serde(
        default,
        alias = "EstimatedDuration",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_duration: Option<u64>,
}

impl TestCase {
    /// Creates a file-format test case for the given path.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Creates an example-format test case.
    pub fn example(
        path: impl Into<String>,
        scope: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            scope: scope.into(),
            name: name.into(),
            format: TestFormat::Example,
            ..Default::default()
        }
    }

    /// Sets an explicit identifier.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Returns the de-duplication key for this case.
    ///
    /// Outcomes and the service's muted test list are both keyed by
    /// `scope/name`. Cases that carry neither (whole files) fall back to the
    /// identifier, then the path.
    pub fn key(&self) -> String {
        if !self.scope.is_empty() || !self.name.is_empty() {
            format!("{}/{}", self.scope, self.name)
        } else if !self.identifier.is_empty() {
            self.identifier.clone()
        } else {
            self.path.clone()
        }
    }
}

/// The tests assigned to a single node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "NodeNumber")]
    pub node_number: usize,

    #[serde(default, alias = "Tests")]
    pub tests: Vec<TestCase>,

    /// Granularity of the tests, set on locally computed tasks.
    #[serde(default, alias = "Format", skip_serializing_if = "Option::is_none")]
    pub format: Option<TestFormat>,
}

/// Mapping from node number (as a string) to its [`Task`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(default, alias = "Tasks")]
    pub tasks: HashMap<String, Task>,

    #[serde(default, alias = "MutedTests", skip_serializing_if = "Vec::is_empty")]
    pub muted_tests: Vec<TestCase>,

    #[serde(default, alias = "SkippedTests", skip_serializing_if = "Vec::is_empty")]
    pub skipped_tests: Vec<TestCase>,

    /// True when the plan was computed locally rather than by the service.
    #[serde(default, alias = "Fallback")]
    pub fallback: bool,

    #[serde(default, alias = "Identifier", skip_serializing_if = "String::is_empty")]
    pub identifier: String,

    #[serde(default, alias = "Parallelism")]
    pub parallelism: usize,
}

impl TestPlan {
    /// Returns the task for the given node, if the plan has one.
    pub fn task_for_node(&self, node_index: usize) -> Option<&Task> {
        self.tasks.get(&node_index.to_string())
    }

    /// An empty task map marks an error plan, which must be replaced by a
    /// fallback plan.
    pub fn is_error_plan(&self) -> bool {
        self.tasks.is_empty()
    }
}
