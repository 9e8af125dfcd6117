// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use snapshot_harvester::{
    aggregator::CountingPolicy,
    config::{
        ControllerCredentials, RunConfig, DEFAULT_APPLICATION_ID, DEFAULT_LOOKBACK_MINUTES,
        DEFAULT_MAX_CONCURRENCY, DEFAULT_OUTPUT_FILE, DEFAULT_WINDOW_MINUTES,
    },
    controller::ControllerClient,
    error::HarvestError,
    orchestrator::Orchestrator,
    sink::JsonFileSink,
    window::RemainderPolicy,
};

#[derive(Parser, Debug)]
#[command(
    name = "snapshot-harvester",
    about = "Counts the business transactions each error occurred in"
)]
struct Cli {
    /// The Application ID
    #[arg(long, default_value_t = DEFAULT_APPLICATION_ID)]
    app: u64,
    /// Number of minutes to process
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_MINUTES)]
    minutes: u32,
    /// Minutes covered by each snapshot request
    #[arg(long, default_value_t = DEFAULT_WINDOW_MINUTES)]
    window_minutes: u32,
    /// Maximum number of snapshot requests in flight
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    max_concurrency: usize,
    /// Controller credentials file (defaults to APPD_CONFIG_FILE or ./conf.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where to write the JSON report
    #[arg(long, default_value = DEFAULT_OUTPUT_FILE)]
    output: PathBuf,
    /// Also query the minutes left over when --minutes is not a multiple of --window-minutes
    #[arg(long)]
    cover_remainder: bool,
    /// Count the first occurrence of an error in a transaction as 1 instead of 0
    #[arg(long)]
    count_first_occurrence: bool,
}

impl Cli {
    fn apply(self, mut config: RunConfig) -> RunConfig {
        config.application_id = self.app;
        config.lookback_minutes = self.minutes;
        config.window_minutes = self.window_minutes;
        config.max_concurrency = self.max_concurrency;
        config.output_path = self.output;
        if let Some(path) = self.config {
            config.credentials_file = path;
        }
        if self.cover_remainder {
            config.remainder_policy = RemainderPolicy::Cover;
        }
        if self.count_first_occurrence {
            config.counting_policy = CountingPolicy::FirstOccurrenceOne;
        }
        config
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RunConfig::from_env() {
        Ok(config) => cli.apply(config),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", config.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RunConfig) -> Result<(), HarvestError> {
    let credentials = ControllerCredentials::from_file(&config.credentials_file)?;
    debug!("Using controller {}", credentials.base_url());

    let client = ControllerClient::new(
        &credentials,
        config.https_proxy.as_deref(),
        config.query_timeout,
    )?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping outstanding requests");
            interrupt.cancel();
        }
    });

    let orchestrator =
        Orchestrator::from_client(client, Box::new(JsonFileSink::new(&config.output_path)))
            .with_cancellation(cancel);
    let summary = orchestrator.run(&config).await?;

    info!(
        "Wrote {} errors from {} snapshots across {} windows to {}",
        summary.errors,
        summary.snapshots,
        summary.windows,
        config.output_path.display()
    );
    Ok(())
}
