use crate::{
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_core::{sink::WriterSink, state::load_state};
use engine_runtime::{
    catalog::Catalog,
    execution::executor::{self, SyncOutcome},
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod error;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "tap-mailchimp",
    version,
    about = "Extracts Mailchimp lists, members, campaigns and email activity as Singer messages"
)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long)]
    config: PathBuf,

    /// Path to a state file from a previous run.
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Path to a catalog limiting which streams are synced.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print the catalog of available streams and exit.
    #[arg(short, long)]
    discover: bool,
}

#[tokio::main]
async fn main() {
    // Stdout carries the data; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::new();
    shutdown.register_handlers();

    let code = match run(cli, &shutdown).await {
        Ok(()) => ExitCode::Success,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    };

    std::process::exit(code.as_i32());
}

async fn run(cli: Cli, shutdown: &ShutdownCoordinator) -> Result<(), CliError> {
    let config = engine_config::settings::load(&cli.config)?;

    if cli.discover {
        let catalog = executor::discover(&config).await?;
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    let state = load_state(cli.state.as_deref())?;
    let catalog = cli
        .catalog
        .as_deref()
        .map(Catalog::load)
        .transpose()?;

    let outcome = executor::run_with_catalog(
        config,
        state,
        catalog,
        Box::new(WriterSink::stdout()),
        shutdown.cancel_token(),
    )
    .await?;

    finish(outcome, shutdown.is_shutdown_requested())
}

/// A signal that lands after the last stream finished does not fail the run.
fn finish(outcome: SyncOutcome, shutdown_requested: bool) -> Result<(), CliError> {
    match outcome {
        SyncOutcome::Completed => info!("Sync completed"),
        SyncOutcome::StoppedEarly if shutdown_requested => {
            return Err(CliError::ShutdownRequested);
        }
        SyncOutcome::StoppedEarly => info!("Sync stopped early, the next run resumes from state"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_signal_after_completion_succeeds() {
        assert!(finish(SyncOutcome::Completed, true).is_ok());
        assert!(finish(SyncOutcome::Completed, false).is_ok());
    }

    #[test]
    fn interrupted_run_exits_as_shutdown() {
        let err = finish(SyncOutcome::StoppedEarly, true).unwrap_err();
        assert_eq!(err.exit_code().as_i32(), 130);
        assert!(finish(SyncOutcome::StoppedEarly, false).is_ok());
    }
}
