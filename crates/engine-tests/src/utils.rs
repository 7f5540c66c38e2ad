use engine_config::settings::{self, TapConfig};
use engine_core::{
    sink::MemorySink,
    state::TapState,
};
use engine_runtime::{
    error::SyncError,
    execution::executor::{SyncOutcome, run},
};
use flate2::{Compression, write::GzEncoder};
use mockito::{Matcher, Mock, ServerGuard};
use model::messages::Message;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Builds a config that points every request at the mock server. `overrides`
/// are merged over a fast, link-free baseline without export.
pub fn test_config(server: &ServerGuard, overrides: Value) -> TapConfig {
    let mut raw = json!({
        "user_name": "tap",
        "api_key": "secret-us1",
        "base_url": format!("{}/3.0", server.url()),
        "count": 2,
        "use_export": false,
        "max_retries": 1,
        "export_poll_interval": 0,
        "state_flush_interval": 0,
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut raw, overrides) {
        base.extend(extra);
    }
    settings::from_value(raw).expect("valid test config")
}

/// Runs a sync into a memory sink and returns its outcome and every message.
pub async fn sync(config: TapConfig, state: TapState) -> (Result<SyncOutcome, SyncError>, Vec<Message>) {
    sync_with_cancel(config, state, CancellationToken::new()).await
}

pub async fn sync_with_cancel(
    config: TapConfig,
    state: TapState,
    cancel: CancellationToken,
) -> (Result<SyncOutcome, SyncError>, Vec<Message>) {
    let sink = MemorySink::new();
    let outcome = run(config, state, Box::new(sink.clone()), cancel).await;
    (outcome, sink.messages())
}

/// Records emitted for `stream`, in order.
pub fn records(messages: &[Message], stream: &str) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            Message::Record {
                stream: s, record, ..
            } if s == stream => Some(record.clone()),
            _ => None,
        })
        .collect()
}

pub fn schema_streams(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            Message::Schema { stream, .. } => Some(stream.clone()),
            _ => None,
        })
        .collect()
}

/// Value of the last STATE message.
pub fn last_state(messages: &[Message]) -> Value {
    messages
        .iter()
        .rev()
        .find_map(|msg| match msg {
            Message::State { value } => Some(value.clone()),
            _ => None,
        })
        .expect("at least one STATE message")
}

/// Serves the published item schema of every stream.
pub async fn mock_schemas(server: &mut ServerGuard) -> Vec<Mock> {
    let documents = [
        (
            "Lists",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "name": {"type": "string"},
                    "_links": {"type": "array"}
                }
            }),
        ),
        (
            "Campaigns",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "send_time": {"type": "string", "format": "date-time"}
                }
            }),
        ),
        (
            "Lists/Members",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "list_id": {"type": "string"},
                    "last_changed": {"type": "string", "format": "date-time"},
                    "merge_fields": {"type": "object"},
                    "interests": {"type": "object"}
                }
            }),
        ),
        (
            "Reports/EmailActivity",
            json!({
                "type": "object",
                "properties": {
                    "campaign_id": {"type": "string"},
                    "email_id": {"type": "string"},
                    "activity": {"type": "array"}
                }
            }),
        ),
    ];

    let mut mocks = Vec::with_capacity(documents.len());
    for (path, schema) in documents {
        let mock = server
            .mock("GET", format!("/schema/3.0/{path}/Instance.json").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(schema.to_string())
            .create_async()
            .await;
        mocks.push(mock);
    }
    mocks
}

/// Serves one page of `path` at `offset`.
pub async fn mock_page(
    server: &mut ServerGuard,
    path: &str,
    offset: usize,
    key: &str,
    items: Value,
    total: u64,
) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::UrlEncoded("offset".into(), offset.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ key: items, "total_items": total }).to_string())
        .expect(1)
        .create_async()
        .await
}

/// A `.tar.gz` shaped like a finished batch's response archive: one JSON
/// file per `(operation_id, status_code, body)`.
pub fn batch_archive(results: &[(&str, u16, Value)]) -> Vec<u8> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);

    for (idx, (operation_id, status_code, body)) in results.iter().enumerate() {
        let file = json!([{
            "status_code": status_code,
            "operation_id": operation_id,
            "response": body.to_string(),
        }])
        .to_string();

        let mut header = tar::Header::new_gnu();
        header.set_size(file.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("results/{idx}.json"), file.as_bytes())
            .expect("append archive entry");
    }

    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .expect("finish archive")
}
