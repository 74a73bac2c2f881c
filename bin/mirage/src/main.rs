//! Mirage - a synthetic, correlated telemetry generator.
//!
//! Mirage simulates the distributed system described by a scenario file, and streams the traces, logs and metrics it
//! would produce, as OTLP/JSON, to a collector.

#![deny(missing_docs)]

use clap::Parser as _;
use mirage_core::error::GenericError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;
use self::cli::{Action, Cli};

mod driver;
mod settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.log_level().into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(()) => info!("mirage stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    match cli.action {
        Action::Validate(args) => driver::validate(&args.scenario),
        Action::Templates => {
            driver::list_templates();
            Ok(())
        }
        Action::Run(args) => {
            info!("mirage starting...");
            let settings = settings::load(args.settings.as_deref())?;
            driver::run(settings, args).await
        }
    }
}
