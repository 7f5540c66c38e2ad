use crate::shutdown::ExitCode;
use engine_config::settings::error::ConfigError;
use engine_core::error::StateError;
use engine_runtime::error::SyncError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load state: {0}")]
    State(#[from] StateError),

    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::ShutdownRequested | CliError::Sync(SyncError::ShutdownRequested) => {
                ExitCode::ShutdownRequested
            }
            _ => ExitCode::GeneralError,
        }
    }
}
