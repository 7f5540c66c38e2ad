use crate::error::SyncError;
use engine_config::settings::{TapConfig, error::ConfigError};
use engine_core::{connectors::fetcher::Fetcher, error::SourceError};
use model::core::stream::StreamId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub stream: String,
    pub tap_stream_id: String,
    #[serde(default)]
    pub key_properties: Vec<String>,
    pub schema: Value,
}

impl CatalogEntry {
    pub fn new(stream: StreamId, schema: Value) -> Self {
        CatalogEntry {
            stream: stream.to_string(),
            tap_stream_id: stream.to_string(),
            key_properties: stream
                .key_properties()
                .iter()
                .map(|k| k.to_string())
                .collect(),
            schema,
        }
    }

    /// Entries whose schema carries `"selected": false` are listed but
    /// not synced.
    pub fn is_selected(&self) -> bool {
        self.schema.get("selected").and_then(Value::as_bool) != Some(false)
    }
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let contents = fs::read_to_string(path)?;
        let catalog: Catalog = serde_json::from_str(&contents)?;
        info!(
            "Loaded catalog from {} with {} stream(s)",
            path.display(),
            catalog.streams.len()
        );
        Ok(catalog)
    }

    /// Streams selected for sync, in dependency order.
    pub fn selected_streams(&self) -> Result<Vec<StreamId>, ConfigError> {
        let mut streams = self
            .streams
            .iter()
            .filter(|entry| entry.is_selected())
            .map(|entry| {
                entry
                    .tap_stream_id
                    .parse::<StreamId>()
                    .map_err(|_| ConfigError::UnknownStream(entry.tap_stream_id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        streams.sort();
        streams.dedup();
        Ok(streams)
    }

    pub fn schema(&self, stream: StreamId) -> Option<&Value> {
        self.streams
            .iter()
            .find(|entry| entry.tap_stream_id == stream.as_str())
            .map(|entry| &entry.schema)
    }
}

/// Fetches the schema of every stream and shapes it like the emitted records.
pub async fn discover(config: &TapConfig, fetcher: &Fetcher) -> Result<Catalog, SyncError> {
    let mut streams = Vec::with_capacity(StreamId::ALL.len());
    for stream in StreamId::ALL {
        let schema = fetch_schema(stream, config, fetcher)
            .await
            .map_err(|source| SyncError::Stream { stream, source })?;
        streams.push(CatalogEntry::new(stream, schema));
    }

    info!("Discovered {} stream(s)", streams.len());
    Ok(Catalog { streams })
}

pub async fn fetch_schema(
    stream: StreamId,
    config: &TapConfig,
    fetcher: &Fetcher,
) -> Result<Value, SourceError> {
    let mut schema = fetcher.schema(stream.api_resource()).await?;
    customize_schema(stream, &mut schema, config);
    Ok(schema)
}

/// Rewrites a published schema to describe records after transformation.
pub fn customize_schema(stream: StreamId, schema: &mut Value, config: &TapConfig) {
    if !config.keep_links {
        remove_links(schema);
    }

    if stream != StreamId::ListMembers {
        return;
    }

    let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) else {
        return;
    };

    if config.merge_fields_array {
        properties.insert(
            "merge_fields".into(),
            json!({
                "type": ["null", "array"],
                "items": {
                    "type": "object",
                    "properties": {
                        "merge_id": {"type": ["null", "integer"]},
                        "tag": {"type": ["null", "string"]},
                        "name": {"type": ["null", "string"]},
                        "type": {"type": ["null", "string"]},
                        "value": {"type": ["null", "string"]}
                    }
                }
            }),
        );
    }

    if config.interests_array {
        properties.insert(
            "interests".into(),
            json!({
                "type": ["null", "array"],
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": ["null", "string"]},
                        "value": {"type": ["null", "boolean"]}
                    }
                }
            }),
        );
    }
}

fn remove_links(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if let Some(Value::Object(properties)) = map.get_mut("properties") {
                properties.remove("_links");
            }
            map.values_mut().for_each(remove_links);
        }
        Value::Array(items) => items.iter_mut().for_each(remove_links),
        _ => {}
    }
}
