use crate::retry::RetryError;
use connectors::error::ApiError;
use model::core::errors::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse state: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("State must be a JSON object, got: {0}")]
    NotAnObject(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SourceError {
    /// A terminal API failure that was not retried.
    #[error(transparent)]
    Api(ApiError),

    #[error("Giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: ApiError,
    },

    #[error("Malformed record: {0}")]
    Malformed(#[from] ModelError),
}

impl SourceError {
    /// Whether the failure must abort the whole run rather than one stream.
    pub fn aborts_run(&self) -> bool {
        match self {
            SourceError::Api(err) => err.is_auth(),
            SourceError::RetriesExhausted { .. } => true,
            SourceError::Malformed(_) => false,
        }
    }
}

impl From<RetryError<ApiError>> for SourceError {
    fn from(err: RetryError<ApiError>) -> Self {
        match err {
            RetryError::Fatal(source) => SourceError::Api(source),
            RetryError::AttemptsExceeded { attempts, error } => SourceError::RetriesExhausted {
                attempts,
                source: error,
            },
        }
    }
}
