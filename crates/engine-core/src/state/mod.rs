use crate::error::StateError;
use std::{fs, path::Path};
use tracing::{info, warn};

pub mod models;

pub use models::{PartitionProgress, StreamBookmark, TapState};

/// Loads the state file. A missing path, a missing file, or an empty file
/// all mean "no prior state".
pub fn load_state(path: Option<&Path>) -> Result<TapState, StateError> {
    let Some(path) = path else {
        return Ok(TapState::default());
    };

    if !path.exists() {
        warn!("State file {} does not exist, starting fresh", path.display());
        return Ok(TapState::default());
    }

    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(TapState::default());
    }

    let state = TapState::from_value(serde_json::from_str(&contents)?)?;
    info!(
        "Loaded state from {} ({} stream bookmark(s))",
        path.display(),
        state.bookmarks.len()
    );
    Ok(state)
}
