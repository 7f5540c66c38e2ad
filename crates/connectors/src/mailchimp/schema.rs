use crate::{
    error::ApiError,
    mailchimp::client::{MailChimpClient, read_json},
};
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Nesting bound for `$ref` resolution; definitions may reference themselves.
const MAX_REF_DEPTH: usize = 8;

/// `lists.members` -> `Lists/Members`, `reports.email_activity` -> `Reports/EmailActivity`.
pub fn schema_path(api_resource: &str) -> String {
    api_resource
        .split('.')
        .map(|part| {
            part.split('_')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl MailChimpClient {
    /// Location of the published item schema for an API resource.
    pub fn schema_url(&self, api_resource: &str) -> Result<Url, ApiError> {
        let base =
            Url::parse(&self.base_url).map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?;
        let origin = base.origin().ascii_serialization();
        let url = format!("{origin}/schema/3.0/{}/Instance.json", schema_path(api_resource));
        Url::parse(&url).map_err(|_| ApiError::InvalidUrl(url))
    }

    /// Fetches the JSON schema of one item of `api_resource` with every
    /// `$ref` inlined.
    pub async fn fetch_schema(&self, api_resource: &str) -> Result<Value, ApiError> {
        let url = self.schema_url(api_resource)?;
        let mut schema = self.fetch_document(&url).await?;

        for _ in 0..MAX_REF_DEPTH {
            let mut refs = BTreeSet::new();
            collect_refs(&schema, &mut refs);
            if refs.is_empty() {
                return Ok(schema);
            }

            for reference in &refs {
                let target = url
                    .join(reference)
                    .map_err(|_| ApiError::InvalidUrl(reference.clone()))?;
                let document = self.fetch_document(&target).await?;
                let mut cache = self.schema_cache.lock().await;
                cache.entry(reference.clone()).or_insert(document);
            }

            let cache = self.schema_cache.lock().await;
            inline_refs(&mut schema, &|reference| cache.get(reference).cloned());
        }

        warn!(
            resource = api_resource,
            "Schema still has unresolved references after {MAX_REF_DEPTH} passes"
        );
        Ok(schema)
    }

    async fn fetch_document(&self, url: &Url) -> Result<Value, ApiError> {
        if let Some(cached) = self.schema_cache.lock().await.get(url.as_str()) {
            return Ok(cached.clone());
        }

        debug!(%url, "Fetching schema document");
        let response = self.http.get(url.clone()).send().await?;
        let document = read_json(response).await?;
        self.schema_cache
            .lock()
            .await
            .insert(url.to_string(), document.clone());
        Ok(document)
    }
}

fn collect_refs(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                refs.insert(reference.clone());
            }
            map.values().for_each(|child| collect_refs(child, refs));
        }
        Value::Array(items) => items.iter().for_each(|child| collect_refs(child, refs)),
        _ => {}
    }
}

/// Replaces each `$ref` with the keys of the referenced document.
fn inline_refs(value: &mut Value, lookup: &dyn Fn(&str) -> Option<Value>) {
    match value {
        Value::Object(map) => {
            let resolved = match map.get("$ref") {
                Some(Value::String(reference)) => lookup(reference),
                _ => None,
            };
            if let Some(Value::Object(target)) = resolved {
                map.remove("$ref");
                merge_into(map, target);
            }
            map.values_mut().for_each(|child| inline_refs(child, lookup));
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|child| inline_refs(child, lookup)),
        _ => {}
    }
}

fn merge_into(map: &mut Map<String, Value>, target: Map<String, Value>) {
    for (key, value) in target {
        map.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailchimp::client::ClientSettings;
    use mockito::Server;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn maps_resources_to_schema_paths() {
        assert_eq!(schema_path("lists"), "Lists");
        assert_eq!(schema_path("lists.members"), "Lists/Members");
        assert_eq!(schema_path("reports.email_activity"), "Reports/EmailActivity");
    }

    #[test]
    fn inlines_nested_references() {
        let mut schema = json!({
            "properties": {
                "stats": {"$ref": "Stats.json"},
                "tags": {"type": "array", "items": {"$ref": "Tag.json"}}
            }
        });
        let lookup = |reference: &str| match reference {
            "Stats.json" => Some(json!({"type": "object", "title": "Stats"})),
            _ => None,
        };

        inline_refs(&mut schema, &lookup);

        assert_eq!(
            schema["properties"]["stats"],
            json!({"type": "object", "title": "Stats"})
        );
        assert_eq!(schema["properties"]["tags"]["items"], json!({"$ref": "Tag.json"}));
    }

    #[tokio::test]
    async fn fetches_and_resolves_schema() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/schema/3.0/Lists/Members/Instance.json")
            .with_status(200)
            .with_body(
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "location": {"$ref": "/schema/3.0/Definitions/Location.json"}
                    }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let definition = server
            .mock("GET", "/schema/3.0/Definitions/Location.json")
            .with_status(200)
            .with_body(r#"{"type": "object", "properties": {"country_code": {"type": "string"}}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = MailChimpClient::new(ClientSettings {
            base_url: format!("{}/3.0", server.url()),
            user_name: "u".into(),
            api_key: "k".into(),
            user_agent: "test".into(),
            timeout: Duration::from_secs(5),
            exclude_links: false,
        })
        .unwrap();

        let schema = client.fetch_schema("lists.members").await.unwrap();
        assert_eq!(
            schema["properties"]["location"]["properties"]["country_code"]["type"],
            "string"
        );

        // Served from cache on the second call.
        client.fetch_schema("lists.members").await.unwrap();
        definition.assert_async().await;
    }
}
