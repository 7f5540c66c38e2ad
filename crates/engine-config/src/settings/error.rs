use thiserror::Error;

/// Errors raised while loading or validating the tap configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read the configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse the configuration file as JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing required config key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Unknown stream in 'streams': {0}")]
    UnknownStream(String),

    /// A child stream was enabled without the stream that provides its ids.
    #[error("Stream '{child}' requires its parent stream '{parent}' to be enabled")]
    ParentDisabled { child: String, parent: String },

    #[error("Cannot derive the API data center from 'api_key' (expected '<key>-<dc>'); set 'base_url'")]
    MissingDatacenter,
}
