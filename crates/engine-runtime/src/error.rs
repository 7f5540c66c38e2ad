use connectors::error::ApiError;
use engine_config::settings::error::ConfigError;
use engine_core::error::{SinkError, SourceError, StateError};
use model::core::stream::StreamId;
use thiserror::Error;

/// Top-level errors for a sync or discovery run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The API client could not be constructed.
    #[error("Client error: {0}")]
    Client(#[from] ApiError),

    /// A failure that aborts the run: bad credentials or exhausted retries.
    #[error("Stream '{stream}' aborted the run: {source}")]
    Stream {
        stream: StreamId,
        #[source]
        source: SourceError,
    },

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Failed to write output: {0}")]
    Sink(#[from] SinkError),

    #[error("Failed to read the catalog: {0}")]
    CatalogRead(#[from] std::io::Error),

    #[error("Failed to parse the catalog: {0}")]
    CatalogParse(#[from] serde_json::Error),

    #[error("Shutdown requested")]
    ShutdownRequested,

    /// The run completed, but these streams failed along the way.
    #[error("Streams failed: {}", join(.0))]
    StreamsFailed(Vec<StreamId>),
}

fn join(streams: &[StreamId]) -> String {
    streams
        .iter()
        .map(StreamId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
