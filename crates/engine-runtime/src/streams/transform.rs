use engine_config::settings::TapConfig;
use engine_core::{connectors::fetcher::Fetcher, error::SourceError};
use model::{core::stream::StreamId, records::record::Record};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::debug;

/// Options that shape emitted records.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    pub keep_links: bool,
    pub merge_fields_array: bool,
    pub interests_array: bool,
    pub include_empty_activity: bool,
}

impl From<&TapConfig> for TransformOptions {
    fn from(config: &TapConfig) -> Self {
        TransformOptions {
            keep_links: config.keep_links,
            merge_fields_array: config.merge_fields_array,
            interests_array: config.interests_array,
            include_empty_activity: config.include_empty_activity,
        }
    }
}

/// Applies the per-stream record rewrites before emission.
pub struct RecordTransformer {
    options: TransformOptions,
    fetcher: Fetcher,
    /// Merge-field definitions by list id, then by tag.
    merge_fields: HashMap<String, HashMap<String, Value>>,
}

impl RecordTransformer {
    pub fn new(options: TransformOptions, fetcher: Fetcher) -> Self {
        RecordTransformer {
            options,
            fetcher,
            merge_fields: HashMap::new(),
        }
    }

    /// Returns `None` when the record should not be emitted.
    pub async fn apply(
        &mut self,
        stream: StreamId,
        mut record: Record,
        schema: &Value,
    ) -> Result<Option<Record>, SourceError> {
        if !self.options.keep_links {
            record.remove_key_recursive("_links");
        }

        match stream {
            StreamId::ListMembers => {
                if self.options.merge_fields_array {
                    let list_id = record
                        .get("list_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    if let Some(list_id) = list_id {
                        let definitions = self.merge_field_definitions(&list_id).await?;
                        merge_fields_to_array(&mut record, definitions);
                    }
                }
                if self.options.interests_array {
                    interests_to_array(&mut record);
                }
            }
            StreamId::EmailActivityReports => {
                if !self.options.include_empty_activity && !has_activity(&record) {
                    return Ok(None);
                }
            }
            StreamId::Lists | StreamId::Campaigns => {}
        }

        strip_empty_datetimes(record.as_map_mut(), schema);
        Ok(Some(record))
    }

    async fn merge_field_definitions(
        &mut self,
        list_id: &str,
    ) -> Result<&HashMap<String, Value>, SourceError> {
        if !self.merge_fields.contains_key(list_id) {
            let fields = self.fetcher.merge_fields(list_id).await?;
            debug!(list_id, count = fields.len(), "Cached merge-field definitions");
            let by_tag = fields
                .into_iter()
                .filter_map(|field| {
                    let tag = field.get("tag").and_then(Value::as_str)?.to_string();
                    Some((tag, field))
                })
                .collect();
            self.merge_fields.insert(list_id.to_string(), by_tag);
        }

        Ok(&self.merge_fields[list_id])
    }
}

/// `{TAG: value}` -> `[{merge_id, tag, name, type, value}]`.
pub fn merge_fields_to_array(record: &mut Record, definitions: &HashMap<String, Value>) {
    let Some(Value::Object(fields)) = record.remove("merge_fields") else {
        return;
    };

    let array = fields
        .into_iter()
        .map(|(tag, value)| {
            let definition = definitions.get(&tag);
            let attr = |key: &str| {
                definition
                    .and_then(|d| d.get(key))
                    .cloned()
                    .unwrap_or(Value::Null)
            };
            json!({
                "merge_id": attr("merge_id"),
                "tag": tag,
                "name": attr("name"),
                "type": attr("type"),
                "value": stringify(value),
            })
        })
        .collect();

    record.insert("merge_fields", Value::Array(array));
}

/// `{id: bool}` -> `[{id, value}]`.
pub fn interests_to_array(record: &mut Record) {
    let Some(Value::Object(interests)) = record.remove("interests") else {
        return;
    };

    let array = interests
        .into_iter()
        .map(|(id, value)| json!({"id": id, "value": value}))
        .collect();
    record.insert("interests", Value::Array(array));
}

fn stringify(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

fn has_activity(record: &Record) -> bool {
    record
        .get("activity")
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty())
}

/// Drops `""` wherever the schema declares `format: date-time`; the API uses
/// empty strings for unset timestamps.
pub fn strip_empty_datetimes(object: &mut Map<String, Value>, schema: &Value) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };

    for (key, property) in properties {
        if is_datetime(property) && object.get(key).is_some_and(|v| v.as_str() == Some("")) {
            object.remove(key);
            continue;
        }

        match object.get_mut(key) {
            Some(Value::Object(child)) => strip_empty_datetimes(child, property),
            Some(Value::Array(items)) => {
                let Some(item_schema) = property.get("items") else {
                    continue;
                };
                for item in items.iter_mut() {
                    if let Value::Object(child) = item {
                        strip_empty_datetimes(child, item_schema);
                    }
                }
            }
            _ => {}
        }
    }
}

fn is_datetime(schema: &Value) -> bool {
    schema.get("format").and_then(Value::as_str) == Some("date-time")
}
