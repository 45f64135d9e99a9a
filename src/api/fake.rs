//! Scripted planning service used by the orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ApiError, ApiResult, FilterTestsParams, FilteredTest, PlanService, TestPlanMetadata,
    TestPlanParams,
};
use crate::plan::TestPlan;

/// A [`PlanService`] answering from per-endpoint scripts.
///
/// Unscripted fetches find no plan, unscripted filters return nothing and
/// unscripted creates fail with a transport error. Every request body is
/// kept for assertions.
#[derive(Default)]
pub struct FakePlanService {
    fetches: Mutex<VecDeque<ApiResult<Option<TestPlan>>>>,
    creates: Mutex<VecDeque<ApiResult<TestPlan>>>,
    filters: Mutex<VecDeque<ApiResult<Vec<FilteredTest>>>>,
    metadata_error: Mutex<Option<ApiError>>,

    fetch_count: Mutex<usize>,
    created: Mutex<Vec<TestPlanParams>>,
    filtered: Mutex<Vec<FilterTestsParams>>,
    metadata: Mutex<Vec<TestPlanMetadata>>,
}

impl FakePlanService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch(self, response: ApiResult<Option<TestPlan>>) -> Self {
        self.fetches.lock().unwrap().push_back(response);
        self
    }

    pub fn with_create(self, response: ApiResult<TestPlan>) -> Self {
        self.creates.lock().unwrap().push_back(response);
        self
    }

    pub fn with_filter(self, response: ApiResult<Vec<FilteredTest>>) -> Self {
        self.filters.lock().unwrap().push_back(response);
        self
    }

    pub fn with_metadata_error(self, error: ApiError) -> Self {
        *self.metadata_error.lock().unwrap() = Some(error);
        self
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }

    pub fn created(&self) -> Vec<TestPlanParams> {
        self.created.lock().unwrap().clone()
    }

    pub fn filtered(&self) -> Vec<FilterTestsParams> {
        self.filtered.lock().unwrap().clone()
    }

    pub fn metadata(&self) -> Vec<TestPlanMetadata> {
        self.metadata.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlanService for FakePlanService {
    async fn fetch_plan(
        &self,
        _suite: &str,
        _identifier: &str,
        _job_retry_count: usize,
    ) -> ApiResult<Option<TestPlan>> {
        *self.fetch_count.lock().unwrap() += 1;
        self.fetches.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn create_plan(&self, _suite: &str, params: &TestPlanParams) -> ApiResult<TestPlan> {
        self.created.lock().unwrap().push(params.clone());
        self.creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Transport("unscripted create".to_string())))
    }

    async fn filter_tests(
        &self,
        _suite: &str,
        params: &FilterTestsParams,
    ) -> ApiResult<Vec<FilteredTest>> {
        self.filtered.lock().unwrap().push(params.clone());
        self.filters.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn post_metadata(
        &self,
        _suite: &str,
        _identifier: &str,
        metadata: &TestPlanMetadata,
    ) -> ApiResult<()> {
        self.metadata.lock().unwrap().push(metadata.clone());
        match self.metadata_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
