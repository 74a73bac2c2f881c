use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use mirage_core::config::parse_duration;
use mirage_core::sender::AuthScheme;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(about, version)]
pub struct Cli {
    /// Enable verbose output. (Specify twice for more verbosity.)
    #[arg(global = true, short = 'v', long, action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Action,
}

impl Cli {
    /// Gets the configured log level based on the user-supplied verbosity level.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand)]
pub enum Action {
    /// Load and validate a scenario, and print a summary of its topology.
    Validate(ValidateArgs),

    /// Generate telemetry for a scenario until interrupted, or until the job fails.
    Run(RunArgs),

    /// List the predefined chaos scenario templates.
    Templates,
}

/// Arguments of `validate`.
#[derive(Args)]
pub struct ValidateArgs {
    /// Path to the scenario file, in YAML format.
    pub scenario: PathBuf,
}

/// Arguments of `run`.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the scenario file, in YAML format.
    pub scenario: PathBuf,

    /// Base URL of the OTLP/HTTP collector, such as `http://localhost:4318`.
    #[arg(short = 'e', long)]
    pub endpoint: String,

    /// API key, sent as `Authorization: ApiKey <key>`.
    #[arg(long, conflicts_with = "bearer_token")]
    pub api_key: Option<String>,

    /// Bearer token, sent as `Authorization: Bearer <token>`.
    #[arg(long)]
    pub bearer_token: Option<String>,

    /// Owner the job counts against.
    #[arg(long, default_value = "local")]
    pub owner: String,

    /// Seed phrase for deterministic generation.
    #[arg(long)]
    pub seed: Option<String>,

    /// Free-text description of the simulated system.
    #[arg(long)]
    pub description: Option<String>,

    /// Predefined chaos scenario to apply once the job is running.
    #[arg(long)]
    pub chaos: Option<String>,

    /// Service targeted by the chaos scenario. (Can be specified multiple times.)
    ///
    /// Defaults to the template's usual targets.
    #[arg(long = "chaos-target", requires = "chaos")]
    pub chaos_targets: Vec<String>,

    /// How long the chaos scenario stays in effect. Defaults to the template's duration.
    #[arg(long, requires = "chaos", value_parser = parse_duration)]
    pub chaos_duration: Option<Duration>,

    /// Time between two job status reports.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub status_interval: Duration,

    /// Path to a runtime settings file, in YAML format.
    ///
    /// Settings can also be given as `MIRAGE_`-prefixed environment variables, such as `MIRAGE_FAILURE_THRESHOLD`.
    #[arg(short = 's', long)]
    pub settings: Option<PathBuf>,
}

impl RunArgs {
    /// Returns how requests to the collector are authenticated.
    pub fn auth(&self) -> AuthScheme {
        match (&self.api_key, &self.bearer_token) {
            (Some(key), _) => AuthScheme::ApiKey(key.clone()),
            (None, Some(token)) => AuthScheme::Bearer(token.clone()),
            (None, None) => AuthScheme::None,
        }
    }
}
