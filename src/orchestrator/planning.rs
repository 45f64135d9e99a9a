//! Obtaining a plan from the planning service, or computing one locally.
//!
//! ```text
//! fetch_plan ──► Some(plan) ──────────────────────────────► plan
//!     │            └── no tasks ──► fallback
//!     └──► None ──► create_request_params ──► create_plan ──► plan
//!                         │                       └── no tasks ──► fallback
//!                         └── filter_tests + get_examples (example splitting)
//!
//! RetryTimeout / Billing anywhere ──► fallback
//! ```

use std::collections::HashSet;

use tracing::debug;

use crate::api::{ApiError, FilterTestsParams, PlanService, TestPlanParams, TestPlanTests};
use crate::config::Config;
use crate::plan::{TestCase, TestPlan, create_fallback_plan};
use crate::runner::{RunnerError, TestRunner};

const FALLBACK_WARNING: &str =
    "⚠️ Falling back to non-intelligent splitting. Your build may take longer than usual.";

/// Failures while asking the service for a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanRequestError {
    #[error("filter tests: {0}")]
    FilterTests(#[source] ApiError),

    #[error("get examples: {0}")]
    GetExamples(#[source] RunnerError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl PlanRequestError {
    /// The service error behind this failure, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            PlanRequestError::FilterTests(e) | PlanRequestError::Api(e) => Some(e),
            PlanRequestError::GetExamples(_) => None,
        }
    }

    /// Whether the caller should carry on with a locally computed plan.
    pub fn is_fallback(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_fallback)
    }
}

/// Lines explaining why the service's plan is not used, or `None` when
/// `error` must not be recovered from.
pub(super) fn fallback_warning(error: &PlanRequestError) -> Option<Vec<String>> {
    match error.api_error()? {
        ApiError::RetryTimeout => Some(vec![
            "⚠️ Could not fetch or create plan from server, falling back to \
             non-intelligent splitting. Your build may take longer than usual."
                .to_string(),
        ]),
        ApiError::Billing(message) => Some(vec![message.clone(), FALLBACK_WARNING.to_string()]),
        _ => None,
    }
}

fn error_plan_warning() -> &'static str {
    "⚠️ Error plan received, falling back to non-intelligent splitting. \
     Your build may take longer than usual."
}

/// Fetches the cached plan for this build, creating it when none exists.
///
/// Falls back to [`create_fallback_plan`] over `files` when the service is
/// unreachable, refuses the request for billing reasons, or answers with
/// an empty task map.
pub async fn fetch_or_create_plan(
    service: &dyn PlanService,
    config: &Config,
    files: &[String],
    runner: &dyn TestRunner,
) -> Result<TestPlan, PlanRequestError> {
    debug!("Fetching test plan");

    let fallback = || create_fallback_plan(&file_cases(files), config.parallelism);
    let recover = |error: PlanRequestError| match fallback_warning(&error) {
        Some(lines) => {
            for line in lines {
                println!("{}", line);
            }
            Ok(fallback())
        }
        None => Err(error),
    };

    match service
        .fetch_plan(&config.suite_slug, &config.identifier, config.job_retry_count)
        .await
    {
        Err(e) => return recover(e.into()),
        Ok(Some(plan)) if plan.is_error_plan() => {
            println!("{}", error_plan_warning());
            return Ok(fallback());
        }
        Ok(Some(plan)) => {
            debug!("Test plan found. Identifier: {:?}", config.identifier);
            return Ok(plan);
        }
        Ok(None) => {}
    }

    debug!("No test plan found, creating a new plan");
    let plan = match create_plan(service, config, files, runner).await {
        Ok(plan) => plan,
        Err(e) => return recover(e),
    };

    if plan.is_error_plan() {
        println!("{}", error_plan_warning());
        return Ok(fallback());
    }

    debug!("Test plan created. Identifier: {:?}", config.identifier);
    Ok(plan)
}

/// Builds the request for `files` and asks the service to create a plan.
pub async fn create_plan(
    service: &dyn PlanService,
    config: &Config,
    files: &[String],
    runner: &dyn TestRunner,
) -> Result<TestPlan, PlanRequestError> {
    let params = create_request_params(service, config, files, runner).await?;
    debug!("Creating test plan");
    Ok(service.create_plan(&config.suite_slug, &params).await?)
}

/// Builds the body of a plan creation request.
///
/// Runners that can split files into examples always go through
/// [`filter_tests`](PlanService::filter_tests), since the service may ask
/// for examples (e.g. of files with skipped tests) even when splitting
/// slow files was not requested.
pub async fn create_request_params(
    service: &dyn PlanService,
    config: &Config,
    files: &[String],
    runner: &dyn TestRunner,
) -> Result<TestPlanParams, PlanRequestError> {
    let files = file_cases(files);

    let parallelism = if config.max_parallelism != 0 && config.parallelism == 0 {
        1
    } else {
        config.parallelism
    };

    let tests = if runner.supported_features().split_by_example {
        if config.split_by_example {
            debug!("Splitting by example");
        }
        filter_and_split(service, config, parallelism, files, runner).await?
    } else {
        TestPlanTests {
            files,
            examples: Vec::new(),
        }
    };

    // The service has no separate pytest-pants runner.
    let runner_name = match config.test_runner.as_str() {
        "pytest-pants" => "pytest",
        other => other,
    };

    Ok(TestPlanParams {
        identifier: config.identifier.clone(),
        parallelism,
        max_parallelism: config.max_parallelism,
        target_time: config.target_time.as_secs_f64(),
        branch: config.branch.clone(),
        runner: runner_name.to_string(),
        tests,
    })
}

/// Replaces the files the service selects with their examples.
async fn filter_and_split(
    service: &dyn PlanService,
    config: &Config,
    parallelism: usize,
    files: Vec<TestCase>,
    runner: &dyn TestRunner,
) -> Result<TestPlanTests, PlanRequestError> {
    debug!("Filtering {} files", files.len());
    let params = FilterTestsParams {
        files,
        parallelism,
        split_by_example: config.split_by_example,
        env: serde_json::to_value(config).unwrap_or_default(),
    };
    let filtered = service
        .filter_tests(&config.suite_slug, &params)
        .await
        .map_err(PlanRequestError::FilterTests)?;

    let files = params.files;
    if filtered.is_empty() {
        debug!("No filtered files found");
        return Ok(TestPlanTests {
            files,
            examples: Vec::new(),
        });
    }

    debug!("Getting examples for {} filtered files", filtered.len());
    let split: Vec<String> = filtered.into_iter().map(|t| t.path).collect();
    let examples = runner
        .get_examples(&split)
        .await
        .map_err(PlanRequestError::GetExamples)?;
    debug!("Got {} examples within the filtered files", examples.len());

    let split: HashSet<String> = split.into_iter().collect();
    let files = files
        .into_iter()
        .filter(|f| !split.contains(&f.path))
        .collect();

    Ok(TestPlanTests { files, examples })
}

fn file_cases(files: &[String]) -> Vec<TestCase> {
    files.iter().map(TestCase::file).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::FilteredTest;
    use crate::api::fake::FakePlanService;
    use crate::plan::Task;
    use crate::runner::SupportedFeatures;
    use crate::runner::fake::FakeRunner;

    fn config() -> Config {
        Config {
            suite_slug: "fruit".to_string(),
            identifier: "build-1/step-1".to_string(),
            parallelism: 2,
            test_runner: "rspec".to_string(),
            ..Default::default()
        }
    }

    fn plan_for(node: usize, paths: &[&str]) -> TestPlan {
        let task = Task {
            node_number: node,
            tests: paths.iter().map(|p| TestCase::file(*p)).collect(),
                ..Default::default()
        };
        TestPlan {
            tasks: [(node.to_string(), task)].into_iter().collect(),
            parallelism: 2,
            ..Default::default()
        }
    }

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn example_splitting() -> SupportedFeatures {
        SupportedFeatures {
            split_by_example: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cached_plan_is_used() {
        let service = FakePlanService::new().with_fetch(Ok(Some(plan_for(1, &["b_spec.rb"]))));
        let runner = FakeRunner::new(vec![]);

        let plan = fetch_or_create_plan(&service, &config(), &files(&["a_spec.rb"]), &runner)
            .await
            .unwrap();

        assert!(!plan.fallback);
        assert_eq!(plan.task_for_node(1).unwrap().tests[0].path, "b_spec.rb");
        assert!(service.created().is_empty());
    }

    #[tokio::test]
    async fn test_missing_plan_is_created() {
        let service = FakePlanService::new().with_create(Ok(plan_for(0, &["a_spec.rb"])));
        let runner = FakeRunner::new(vec![]);

        let plan = fetch_or_create_plan(&service, &config(), &files(&["a_spec.rb"]), &runner)
            .await
            .unwrap();

        assert!(!plan.fallback);
        assert_eq!(service.fetch_count(), 1);
        let created = service.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].identifier, "build-1/step-1");
        assert_eq!(created[0].tests.files, vec![TestCase::file("a_spec.rb")]);
    }

    #[tokio::test]
    async fn test_retry_timeout_falls_back() {
        let service = FakePlanService::new().with_fetch(Err(ApiError::RetryTimeout));
        let runner = FakeRunner::new(vec![]);

        let plan = fetch_or_create_plan(
            &service,
            &config(),
            &files(&["x", "y", "z", "w", "v"]),
            &runner,
        )
        .await
        .unwrap();

        assert!(plan.fallback);
        let paths = |node| -> Vec<String> {
            plan.task_for_node(node)
                .unwrap()
                .tests
                .iter()
                .map(|t| t.path.clone())
                .collect()
        };
        assert_eq!(paths(0), vec!["v", "x", "z"]);
        assert_eq!(paths(1), vec!["w", "y"]);
    }

    #[tokio::test]
    async fn test_billing_error_on_create_falls_back() {
        let service = FakePlanService::new()
            .with_create(Err(ApiError::Billing("Billing Error: plan limit".to_string())));
        let runner = FakeRunner::new(vec![]);

        let plan = fetch_or_create_plan(&service, &config(), &files(&["a", "b"]), &runner)
            .await
            .unwrap();

        assert!(plan.fallback);
        assert_eq!(plan.tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_error_plan_falls_back() {
        let service = FakePlanService::new().with_fetch(Ok(Some(TestPlan::default())));
        let runner = FakeRunner::new(vec![]);

        let plan = fetch_or_create_plan(&service, &config(), &files(&["a"]), &runner)
            .await
            .unwrap();

        assert!(plan.fallback);
        assert_eq!(plan.task_for_node(0).unwrap().tests, vec![TestCase::file("a")]);
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let service = FakePlanService::new()
            .with_fetch(Err(ApiError::Unauthorized("bad token".to_string())));
        let runner = FakeRunner::new(vec![]);

        let err = fetch_or_create_plan(&service, &config(), &files(&["a"]), &runner)
            .await
            .unwrap_err();

        assert!(!err.is_fallback());
        assert_eq!(err.to_string(), "unauthorized: bad token");
    }

    #[tokio::test]
    async fn test_request_params_for_file_runner() {
        let service = FakePlanService::new();
        let runner = FakeRunner::new(vec![]);
        let config = Config {
            parallelism: 0,
            max_parallelism: 8,
            target_time: Duration::from_secs(90),
            branch: "main".to_string(),
            test_runner: "pytest-pants".to_string(),
            ..config()
        };

        let params = create_request_params(&service, &config, &files(&["t.py"]), &runner)
            .await
            .unwrap();

        assert_eq!(params.parallelism, 1);
        assert_eq!(params.max_parallelism, 8);
        assert_eq!(params.target_time, 90.0);
        assert_eq!(params.runner, "pytest");
        assert_eq!(params.branch, "main");
        assert!(params.tests.examples.is_empty());
        assert!(service.filtered().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_files_are_split_into_examples() {
        let service = FakePlanService::new().with_filter(Ok(vec![FilteredTest {
            path: "slow_spec.rb".to_string(),
            reason: "slow file".to_string(),
        }]));
        let runner = FakeRunner::new(vec![])
            .with_features(example_splitting())
            .with_examples(vec![
                TestCase::example("slow_spec.rb[1:1]", "Slow", "one"),
                TestCase::example("slow_spec.rb[1:2]", "Slow", "two"),
                TestCase::example("fast_spec.rb[1:1]", "Fast", "one"),
            ]);
        let config = Config {
            split_by_example: true,
            ..config()
        };

        let params = create_request_params(
            &service,
            &config,
            &files(&["fast_spec.rb", "slow_spec.rb"]),
            &runner,
        )
        .await
        .unwrap();

        assert_eq!(params.tests.files, vec![TestCase::file("fast_spec.rb")]);
        assert_eq!(params.tests.examples.len(), 2);
        let filtered = service.filtered();
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].split_by_example);
        assert_eq!(filtered[0].env["suite_slug"], "fruit");
    }

    #[tokio::test]
    async fn test_filter_runs_without_split_by_example() {
        let service = FakePlanService::new();
        let runner = FakeRunner::new(vec![]).with_features(example_splitting());

        let params = create_request_params(&service, &config(), &files(&["a_spec.rb"]), &runner)
            .await
            .unwrap();

        assert_eq!(service.filtered().len(), 1);
        assert_eq!(params.tests.files, vec![TestCase::file("a_spec.rb")]);
        assert!(params.tests.examples.is_empty());
    }

    #[tokio::test]
    async fn test_filter_timeout_falls_back() {
        let service = FakePlanService::new().with_filter(Err(ApiError::RetryTimeout));
        let runner = FakeRunner::new(vec![]).with_features(example_splitting());

        let plan = fetch_or_create_plan(&service, &config(), &files(&["a_spec.rb"]), &runner)
            .await
            .unwrap();

        assert!(plan.fallback);
        assert!(service.created().is_empty());
    }

    #[tokio::test]
    async fn test_filter_error_is_wrapped() {
        let service = FakePlanService::new()
            .with_filter(Err(ApiError::InvalidRequest("bad files".to_string())));
        let runner = FakeRunner::new(vec![]).with_features(example_splitting());

        let err = create_request_params(&service, &config(), &files(&["a_spec.rb"]), &runner)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "filter tests: request was invalid: bad files");
    }
}
