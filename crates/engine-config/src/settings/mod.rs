use error::ConfigError;
use raw::RawConfig;
use std::{fs, path::Path};
use tracing::info;

pub mod error;
pub mod lenient;
pub mod raw;
pub mod validated;

pub use validated::TapConfig;

/// Read, parse, and validate the JSON config file at `path`.
pub fn load(path: &Path) -> Result<TapConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config = from_json_str(&contents)?;
    info!(
        "Loaded config from {}: {} stream(s) enabled, page size {}",
        path.display(),
        config.streams.len(),
        config.count
    );
    Ok(config)
}

pub fn from_json_str(contents: &str) -> Result<TapConfig, ConfigError> {
    let raw: RawConfig = serde_json::from_str(contents)?;
    TapConfig::from_raw(raw)
}

pub fn from_value(value: serde_json::Value) -> Result<TapConfig, ConfigError> {
    let raw: RawConfig = serde_json::from_value(value)?;
    TapConfig::from_raw(raw)
}
