#![allow(clippy::result_large_err)]

use std::time::Duration;

use clap::Parser;
use miette::Diagnostic;
use miette::Result;
use stafett::config::ConfigError;
use stafett::config::DEFAULT_BASE_URL;
use stafett::config::RunConfig;
use stafett::outputter::OutPutter;
use stafett::parser::Stafett;
use stafett::runner::Event;
use stafett::runner::Runner;
use stafett::runner::RunnerError;
use stafett::scenario::Scenario;
use stafett::validator::ValidationError;
use stafett::validator::Validator;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

mod cli;

#[derive(Error, Debug, Diagnostic)]
pub enum StafettError {
    #[error("Failed to read scenario file")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse scenario file")]
    TomlParsing(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("Invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Runner failed: {0}")]
    Runner(#[from] RunnerError),

    #[error("Outputter task failed")]
    Outputter(#[from] tokio::task::JoinError),

    #[error("Scenario aborted at `{0}`")]
    #[diagnostic(help("run without --fail-fast to skip dependent cases and keep going"))]
    Aborted(String),

    #[error("{failed} of {total} test cases failed")]
    TestsFailed { failed: usize, total: usize },
}

/// Loads the scenario file and validates its contents.
///
/// CLI flags take precedence over the `[setup]` section of the file, which
/// takes precedence over the built-in defaults.
///
/// # Errors
/// Returns a `StafettError` if the file cannot be read, the TOML fails to
/// parse, validation fails, or the resulting run configuration is invalid.
fn load_and_validate_config(cli: &Cli) -> Result<(Scenario, RunConfig), StafettError> {
    let contents = std::fs::read_to_string(&cli.path)?;
    let stafett: Stafett = toml::from_str(&contents)?;

    let (scenario, setup) = Validator::new(&stafett, &contents, &cli.path).validate()?;

    let base_url = cli
        .base_url
        .as_deref()
        .or(setup.base_url.as_deref())
        .unwrap_or(DEFAULT_BASE_URL);

    let mut config = RunConfig::new(base_url)?.with_fail_fast(cli.fail_fast);
    if let Some(timeout) = cli.timeout_secs.map(Duration::from_secs).or(setup.timeout) {
        config = config.with_timeout(timeout)?;
    }

    Ok((scenario, config))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let (scenario, config) = load_and_validate_config(&cli)?;
    let n_cases = scenario.len();

    tracing::info!(base_url = %config.base_url(), cases = n_cases, "starting scenario");

    // The outputter prints every event as the runner produces it and ends
    // once the runner, the only sender, is dropped.
    let (tx, rx) = flume::unbounded::<Event>();
    let path = cli.path.clone();
    let outputter_handle = tokio::spawn(async move { OutPutter::start(rx, &path, n_cases).await });

    let runner = Runner::new(config, tx).map_err(StafettError::Runner)?;
    let report = runner.run(&scenario).await.map_err(StafettError::Runner)?;
    drop(runner);

    let summary = outputter_handle.await.map_err(StafettError::Outputter)?;

    if let Some(case) = report.aborted_at {
        return Err(StafettError::Aborted(case).into());
    }

    if summary.failed > 0 {
        return Err(StafettError::TestsFailed {
            failed: summary.failed,
            total: n_cases,
        }
        .into());
    }

    Ok(())
}
