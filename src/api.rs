//! Client for the Test Engine planning service.
//!
//! Every call goes through one retry loop: connection failures, timeouts,
//! `409`, `429` and `5xx` responses are retried with a jittered exponential
//! backoff until the policy's deadline; any other response is final.
//!
//! ```text
//!  PlanService::create_plan ──► send ──► 200 ──────────────► TestPlan
//!                                 │
//!                                 ├──► 5xx / 409 / io ──► sleep(backoff) ──► send
//!                                 ├──► 429 ──► sleep(RateLimit-Reset) ──► send
//!                                 ├──► 4xx ──► ApiError::{InvalidRequest, Unauthorized, ...}
//!                                 └──► deadline passed ──► ApiError::RetryTimeout
//! ```
//!
//! The orchestrator talks to the [`PlanService`] trait so that tests can
//! script the service's answers.

#[cfg(test)]
pub mod fake;
pub mod retry;
pub mod test_plan;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use crate::plan::TestPlan;

pub use retry::RetryPolicy;
pub use test_plan::{
    FilterTestsParams, FilteredTest, TestPlanMetadata, TestPlanParams, TestPlanTests,
};

/// Result type for planning service calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the planning service client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request was invalid: {0}")]
    InvalidRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The organization's plan does not cover Test Engine.
    #[error("{0}")]
    Billing(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("response code {status}: {message}")]
    Response { status: u16, message: String },

    /// Retryable failures persisted past the retry deadline.
    #[error("request retry timeout")]
    RetryTimeout,

    #[error("converting body to json: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("parsing response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Whether the orchestrator should fall back to local splitting.
    pub fn is_fallback(&self) -> bool {
        matches!(self, ApiError::RetryTimeout | ApiError::Billing(_))
    }
}

/// The planning service operations used by a run.
#[async_trait]
pub trait PlanService: Send + Sync {
    /// Fetches a cached plan. `Ok(None)` means no plan exists yet.
    async fn fetch_plan(
        &self,
        suite: &str,
        identifier: &str,
        job_retry_count: usize,
    ) -> ApiResult<Option<TestPlan>>;

    async fn create_plan(&self, suite: &str, params: &TestPlanParams) -> ApiResult<TestPlan>;

    /// Returns the files the service wants split into examples.
    async fn filter_tests(
        &self,
        suite: &str,
        params: &FilterTestsParams,
    ) -> ApiResult<Vec<FilteredTest>>;

    async fn post_metadata(
        &self,
        suite: &str,
        identifier: &str,
        metadata: &TestPlanMetadata,
    ) -> ApiResult<()>;
}

/// Connection settings for [`PlanClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub access_token: String,
    pub organization_slug: String,
}

/// HTTP implementation of [`PlanService`].
#[derive(Clone)]
pub struct PlanClient {
    config: ClientConfig,
    policy: RetryPolicy,
    agent: ureq::Agent,
    user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
struct Request {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    body: Option<String>,
}

/// Outcome of a single HTTP exchange.
enum Exchange {
    Done(ApiResult<String>),
    Retry {
        reason: String,
        wait: Option<Duration>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl PlanClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_policy(config, RetryPolicy::default())
    }

    pub fn with_policy(config: ClientConfig, policy: RetryPolicy) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(policy.request_timeout))
            .http_status_as_error(false)
            .build();

        Self {
            config,
            policy,
            agent: ureq::Agent::new_with_config(agent_config),
            user_agent: format!(
                "Buildkite Test Engine Client/{} ({}/{})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        }
    }

    fn suite_url(&self, suite: &str, path: &str) -> String {
        format!(
            "{}/v2/analytics/organizations/{}/suites/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.organization_slug,
            suite,
            path
        )
    }

    fn post<B: serde::Serialize>(&self, url: String, body: &B) -> ApiResult<Request> {
        Ok(Request {
            method: Method::Post,
            url,
            query: Vec::new(),
            body: Some(serde_json::to_string(body).map_err(ApiError::Encode)?),
        })
    }

    /// Sends `request`, retrying per the policy, and returns the body of the
    /// successful response.
    async fn send_with_retry(&self, request: Request) -> ApiResult<String> {
        let deadline = Instant::now() + self.policy.deadline;
        debug!("Sending request {:?} {}", request.method, request.url);

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                debug!("Retrying request, attempt {}", attempt);
            }

            let agent = self.agent.clone();
            let token = self.config.access_token.clone();
            let user_agent = self.user_agent.clone();
            let pending = request.clone();
            let handle = tokio::task::spawn_blocking(move || {
                send_once(&agent, &token, &user_agent, &pending)
            });

            let exchange = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(exchange)) => exchange,
                Ok(Err(e)) => return Err(ApiError::Transport(e.to_string())),
                Err(_) => return Err(ApiError::RetryTimeout),
            };

            let (reason, wait) = match exchange {
                Exchange::Done(result) => return result,
                Exchange::Retry { reason, wait } => (reason, wait),
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(ApiError::RetryTimeout);
            }
            let delay = wait
                .unwrap_or_else(|| self.policy.backoff(attempt))
                .min(deadline - now);
            debug!("{}, retrying in {:?}", reason, delay);
            tokio::time::sleep(delay).await;

            if Instant::now() >= deadline {
                return Err(ApiError::RetryTimeout);
            }
            attempt += 1;
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: Request) -> ApiResult<T> {
        let body = self.send_with_retry(request).await?;
        serde_json::from_str(&body).map_err(ApiError::Decode)
    }
}

/// Performs one HTTP exchange and classifies the response.
fn send_once(agent: &ureq::Agent, token: &str, user_agent: &str, request: &Request) -> Exchange {
    let authorization = format!("Bearer {}", token);
    let response = match request.method {
        Method::Get => {
            let mut builder = agent.get(&request.url);
            for (key, value) in &request.query {
                builder = builder.query(key, value);
            }
            builder
                .header("Authorization", &authorization)
                .header("User-Agent", user_agent)
                .header("Content-Type", "application/json")
                .call()
        }
        Method::Post => agent
            .post(&request.url)
            .header("Authorization", &authorization)
            .header("User-Agent", user_agent)
            .header("Content-Type", "application/json")
            .send(request.body.as_deref().unwrap_or("")),
    };

    let mut response = match response {
        Ok(response) => response,
        Err(e) => {
            return Exchange::Retry {
                reason: format!("Error sending request: {}", e),
                wait: None,
            };
        }
    };

    let status = response.status().as_u16();
    debug!("Response code {}", status);

    if status == 429 {
        let wait = response
            .headers()
            .get("RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Exchange::Retry {
            reason: "response code: 429".to_string(),
            wait,
        };
    }
    if status == 409 || status >= 500 {
        return Exchange::Retry {
            reason: format!("response code: {}", status),
            wait: None,
        };
    }

    let body = match response.body_mut().read_to_string() {
        Ok(body) => body,
        Err(e) => {
            return Exchange::Done(Err(ApiError::Transport(format!(
                "reading response body: {}",
                e
            ))));
        }
    };

    if (200..300).contains(&status) {
        return Exchange::Done(Ok(body));
    }

    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.trim().to_string());
    Exchange::Done(Err(status_error(status, message)))
}

fn status_error(status: u16, message: String) -> ApiError {
    match status {
        400 => ApiError::InvalidRequest(message),
        401 => ApiError::Unauthorized(message),
        403 if message.starts_with("Billing Error") => ApiError::Billing(message),
        403 => ApiError::Unauthorized(message),
        404 => ApiError::NotFound(message),
        _ => ApiError::Response { status, message },
    }
}

#[async_trait]
impl PlanService for PlanClient {
    async fn fetch_plan(
        &self,
        suite: &str,
        identifier: &str,
        job_retry_count: usize,
    ) -> ApiResult<Option<TestPlan>> {
        let retry_count = job_retry_count.to_string();
        let request = Request {
            method: Method::Get,
            url: self.suite_url(suite, "test_plan"),
            query: vec![
                ("identifier".to_string(), identifier.to_string()),
                ("retry_count".to_string(), retry_count.clone()),
                ("job_retry_count".to_string(), retry_count),
            ],
            body: None,
        };

        match self.send_json(request).await {
            Ok(plan) => Ok(Some(plan)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_plan(&self, suite: &str, params: &TestPlanParams) -> ApiResult<TestPlan> {
        let request = self.post(self.suite_url(suite, "test_plan"), params)?;
        self.send_json(request).await
    }

    async fn filter_tests(
        &self,
        suite: &str,
        params: &FilterTestsParams,
    ) -> ApiResult<Vec<FilteredTest>> {
        let request = self.post(self.suite_url(suite, "test_plan/filter_tests"), params)?;
        let response: test_plan::FilterTestsResponse = self.send_json(request).await?;
        Ok(response.tests)
    }

    async fn post_metadata(
        &self,
        suite: &str,
        identifier: &str,
        metadata: &TestPlanMetadata,
    ) -> ApiResult<()> {
        debug!("Posting metadata for plan {:?}", identifier);
        let request = self.post(self.suite_url(suite, "test_plan_metadata"), metadata)?;
        self.send_with_retry(request).await.map(|_| ())
    }
}
