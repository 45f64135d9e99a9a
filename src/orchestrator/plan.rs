//! The `plan` command.
//!
//! Creates the plan for a build ahead of its test jobs and hands the plan
//! identifier and the chosen parallelism on to the pipeline, either as a
//! JSON object suitable for `buildkite-agent env set` or by running
//! `buildkite-agent pipeline upload` with both values in the environment.

use std::io::Write;

use serde::Serialize;
use tracing::debug;

use super::planning::{self, fallback_warning};
use super::{OrchestratorError, OrchestratorResult};
use crate::api::PlanService;
use crate::config::Config;
use crate::runner::{CommandSpec, TestRunner, run_and_forward_signal};

const PLAN_IDENTIFIER_ENV: &str = "BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER";
const PARALLELISM_ENV: &str = "BUILDKITE_TEST_ENGINE_PARALLELISM";

/// Where the plan summary goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutput {
    /// One JSON object on stdout.
    Json,
    /// `buildkite-agent pipeline upload <template>`.
    PipelineUpload(String),
}

/// What later jobs need to know about the plan.
///
/// Parallelism is a string because the JSON form is meant to be piped into
/// `buildkite-agent env set --input-format=json`, which only takes string
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    #[serde(rename = "BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER")]
    pub identifier: String,
    #[serde(rename = "BUILDKITE_TEST_ENGINE_PARALLELISM")]
    pub parallelism: String,
}

impl PlanSummary {
    pub fn new(identifier: impl Into<String>, parallelism: usize) -> Self {
        Self {
            identifier: identifier.into(),
            parallelism: parallelism.to_string(),
        }
    }
}

/// Asks the service to create a plan for `files` and summarizes it.
///
/// When the service cannot be reached or refuses for billing reasons, the
/// summary falls back to the configured identifier and maximum
/// parallelism.
pub async fn create_plan_summary(
    service: &dyn PlanService,
    config: &Config,
    files: &[String],
    runner: &dyn TestRunner,
) -> OrchestratorResult<PlanSummary> {
    match planning::create_plan(service, config, files, runner).await {
        Ok(plan) => {
            debug!("Test plan created. Identifier: {:?}", plan.identifier);
            Ok(PlanSummary::new(plan.identifier, plan.parallelism))
        }
        Err(e) => match fallback_warning(&e) {
            Some(lines) => {
                for line in lines {
                    eprintln!("{}", line);
                }
                Ok(PlanSummary::new(
                    config.identifier.clone(),
                    config.max_parallelism,
                ))
            }
            None => Err(OrchestratorError::CreatePlan(e)),
        },
    }
}

/// Writes `summary` to `out`, or hands it to the pipeline upload.
pub async fn emit_summary<W: Write>(
    summary: &PlanSummary,
    output: &PlanOutput,
    out: &mut W,
) -> OrchestratorResult<()> {
    match output {
        PlanOutput::Json => {
            serde_json::to_writer(&mut *out, summary)?;
            writeln!(out)?;
        }
        PlanOutput::PipelineUpload(template) => {
            let command = pipeline_upload_command(summary, template);
            writeln!(
                out,
                "Executing buildkite-agent pipeline upload with {}={} {}={}",
                PLAN_IDENTIFIER_ENV, summary.identifier, PARALLELISM_ENV, summary.parallelism
            )?;
            out.flush()?;
            run_and_forward_signal(&command)
                .await
                .map_err(OrchestratorError::PipelineUpload)?;
        }
    }
    Ok(())
}

fn pipeline_upload_command(summary: &PlanSummary, template: &str) -> CommandSpec {
    CommandSpec::new("buildkite-agent")
        .args(["pipeline", "upload", template])
        .env(PLAN_IDENTIFIER_ENV, summary.identifier.clone())
        .env(PARALLELISM_ENV, summary.parallelism.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::api::fake::FakePlanService;
    use crate::plan::{Task, TestPlan};
    use crate::runner::fake::FakeRunner;

    fn config() -> Config {
        Config {
            suite_slug: "fruit".to_string(),
            identifier: "build-1/step-1".to_string(),
            max_parallelism: 12,
            test_runner: "rspec".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_summary_comes_from_created_plan() {
        let plan = TestPlan {
            tasks: [("0".to_string(), Task::default())].into_iter().collect(),
            identifier: "server-id".to_string(),
            parallelism: 4,
            ..Default::default()
        };
        let service = FakePlanService::new().with_create(Ok(plan));
        let runner = FakeRunner::new(vec![]);

        let summary = create_plan_summary(&service, &config(), &["a_spec.rb".to_string()], &runner)
            .await
            .unwrap();

        assert_eq!(summary, PlanSummary::new("server-id", 4));
        assert_eq!(service.fetch_count(), 0);
        assert_eq!(service.created()[0].parallelism, 1);
    }

    #[tokio::test]
    async fn test_summary_falls_back_to_max_parallelism() {
        let service = FakePlanService::new().with_create(Err(ApiError::RetryTimeout));
        let runner = FakeRunner::new(vec![]);

        let summary = create_plan_summary(&service, &config(), &[], &runner)
            .await
            .unwrap();

        assert_eq!(summary, PlanSummary::new("build-1/step-1", 12));
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal() {
        let service = FakePlanService::new()
            .with_create(Err(ApiError::InvalidRequest("no files".to_string())));
        let runner = FakeRunner::new(vec![]);

        let err = create_plan_summary(&service, &config(), &[], &runner)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "create test plan failed: request was invalid: no files"
        );
    }

    #[tokio::test]
    async fn test_json_output() {
        let mut out = Vec::new();
        emit_summary(&PlanSummary::new("abc", 3), &PlanOutput::Json, &mut out)
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER\":\"abc\",\"BUILDKITE_TEST_ENGINE_PARALLELISM\":\"3\"}\n"
        );
    }

    #[test]
    fn test_pipeline_upload_command() {
        let command = pipeline_upload_command(&PlanSummary::new("abc", 3), "pipeline.yml");
        assert_eq!(command.program, "buildkite-agent");
        assert_eq!(command.args, vec!["pipeline", "upload", "pipeline.yml"]);
        assert_eq!(
            command.env.get("BUILDKITE_TEST_ENGINE_PARALLELISM").map(String::as_str),
            Some("3")
        );
        assert_eq!(
            command.env.get("BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER").map(String::as_str),
            Some("abc")
        );
    }
}
