use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("expected a JSON object for a record, got {0}")]
    NotAnObject(String),
}
