use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, timeout, or protocol failure below the HTTP status layer.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    /// 429 Too Many Requests.
    #[error("Rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error {status}: {detail}")]
    Server { status: u16, detail: String },

    /// 401 or 403.
    #[error("Authentication failed ({status}): {detail}")]
    Auth { status: u16, detail: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Request rejected ({status}): {detail}")]
    Client { status: u16, detail: String },

    /// A body that could not be decoded or lacked an expected field.
    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Batch {batch_id} failed: {detail}")]
    BatchFailed { batch_id: String, detail: String },

    #[error("Batch {batch_id} did not finish within {waited:?}")]
    BatchTimeout { batch_id: String, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
