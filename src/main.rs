//! bktec CLI - Buildkite Test Engine client.

use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bktec::api::{ClientConfig, PlanClient};
use bktec::config::{self, Config, ConfigArgs, Mode};
use bktec::executor::RunStatus;
use bktec::orchestrator::{self, OrchestratorError, PlanOutput};

#[derive(Parser)]
#[command(name = "bktec")]
#[command(about = "Buildkite Test Engine Client", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug output
    #[arg(
        long,
        global = true,
        env = "BUILDKITE_TEST_ENGINE_DEBUG_ENABLED",
        action = clap::ArgAction::Set,
        value_parser = config::parse_bool,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    Run {
        #[command(flatten)]
        args: ConfigArgs,
    },

    /// Generate test plan without running tests
    #[command(group(ArgGroup::new("output").args(["json", "pipeline_upload"])))]
    Plan {
        #[command(flatten)]
        args: ConfigArgs,

        /// JSON format output (default)
        #[arg(long)]
        json: bool,

        /// Run `buildkite-agent pipeline upload` with this template. The
        /// plan's BUILDKITE_TEST_ENGINE_PLAN_IDENTIFIER and
        /// BUILDKITE_TEST_ENGINE_PARALLELISM are available to it.
        #[arg(long, value_name = "TEMPLATE")]
        pipeline_upload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let code = match cli.command {
        Commands::Run { args } => run(&args).await,
        Commands::Plan {
            args,
            pipeline_upload,
            ..
        } => {
            let output = match pipeline_upload {
                Some(template) => PlanOutput::PipelineUpload(template),
                None => PlanOutput::Json,
            };
            plan(&args, &output).await
        }
    };

    Ok(ExitCode::from(code))
}

async fn run(args: &ConfigArgs) -> u8 {
    orchestrator::print_startup_message();

    let Some(config) = load_config(args, Mode::Run) else {
        return 1;
    };
    let client = plan_client(&config);

    match orchestrator::run(&config, &client).await {
        Ok(RunStatus::Failed | RunStatus::Error) => 1,
        Ok(status) => {
            debug!("Run finished with status {:?}", status);
            0
        }
        Err(e) => report_error(&e),
    }
}

async fn plan(args: &ConfigArgs, output: &PlanOutput) -> u8 {
    orchestrator::print_startup_message();

    let Some(config) = load_config(args, Mode::Plan) else {
        return 1;
    };
    let client = plan_client(&config);

    match orchestrator::plan(&config, &client, output).await {
        Ok(()) => 0,
        Err(e) => report_error(&e),
    }
}

fn load_config(args: &ConfigArgs, mode: Mode) -> Option<Config> {
    match Config::from_args(args, mode) {
        Ok(config) => {
            debug!("Config: {}", serde_json::to_string(&config).unwrap_or_default());
            Some(config)
        }
        Err(e) => {
            eprintln!("{}", e);
            None
        }
    }
}

fn plan_client(config: &Config) -> PlanClient {
    PlanClient::new(ClientConfig {
        base_url: config.base_url.clone(),
        access_token: config.access_token.clone(),
        organization_slug: config.organization_slug.clone(),
    })
}

fn report_error(error: &OrchestratorError) -> u8 {
    match error {
        OrchestratorError::RunnerSignaled { .. } => {
            println!("Buildkite Test Engine Client: {}", error)
        }
        _ => eprintln!("Error: {}", error),
    }
    u8::try_from(error.exit_code()).unwrap_or(1)
}
