//! bktec: the Buildkite Test Engine client.
//!
//! Splits a test suite across the parallel jobs of a CI step, runs this
//! job's share through the project's own test runner and retries what
//! fails.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Config**: flags and environment variables, validated up front
//! - **Api**: the planning service client and its retry policy
//! - **Plan**: the plan model and the local fallback planner
//! - **Runner**: adapters for RSpec, Jest, Cypress, Playwright, pytest,
//!   Go, Cucumber and custom commands
//! - **Executor**: the attempt loop and the per-test results
//! - **Orchestrator**: the `run` and `plan` commands
//!
//! # Example
//!
//! ```no_run
//! use bktec::api::{ClientConfig, PlanClient};
//! use bktec::config::{Config, ConfigArgs, Mode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = ConfigArgs::default();
//!     let config = Config::from_args(&args, Mode::Run)?;
//!     let client = PlanClient::new(ClientConfig {
//!         base_url: config.base_url.clone(),
//!         access_token: config.access_token.clone(),
//!         organization_slug: config.organization_slug.clone(),
//!     });
//!     let status = bktec::orchestrator::run(&config, &client).await?;
//!     println!("{:?}", status);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod runner;

// Re-export commonly used types
pub use api::{PlanClient, PlanService};
pub use config::{Config, ConfigArgs};
pub use executor::{RunResult, RunStatus};
pub use plan::{TestCase, TestPlan};
pub use runner::{TestRunner, detect_runner};
