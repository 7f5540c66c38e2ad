use crate::core::stream::StreamId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single line of tap output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        bookmark_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_extracted: Option<DateTime<Utc>>,
    },
    State {
        value: Value,
    },
}

impl Message {
    pub fn schema(stream: StreamId, schema: Value) -> Self {
        Message::Schema {
            stream: stream.to_string(),
            schema,
            key_properties: stream
                .key_properties()
                .iter()
                .map(|k| k.to_string())
                .collect(),
            bookmark_properties: stream
                .bookmark_properties()
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    pub fn record(stream: StreamId, record: Value, version: u64) -> Self {
        Message::Record {
            stream: stream.to_string(),
            record,
            version: Some(version),
            time_extracted: Some(Utc::now()),
        }
    }

    pub fn state(value: Value) -> Self {
        Message::State { value }
    }
}
