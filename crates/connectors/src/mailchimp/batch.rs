//! Batch operations: the asynchronous bulk-export path of the API.
//!
//! A batch is a list of GET operations submitted in one POST. The API runs
//! them in the background and publishes the responses as a gzipped tar
//! archive of JSON files.

use crate::{
    error::ApiError,
    mailchimp::client::{MailChimpClient, check_status},
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{collections::BTreeMap, io::Read};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOperation {
    pub method: String,
    /// Path relative to the API root, with a leading slash.
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub operation_id: String,
}

impl BatchOperation {
    pub fn get(path: &str, params: Vec<(String, String)>, operation_id: String) -> Self {
        BatchOperation {
            method: "GET".into(),
            path: format!("/{}", path.trim_start_matches('/')),
            params: params.into_iter().collect(),
            operation_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub total_operations: u64,
    #[serde(default)]
    pub finished_operations: u64,
    #[serde(default)]
    pub errored_operations: u64,
    #[serde(default)]
    pub response_body_url: Option<String>,
}

impl BatchStatus {
    pub fn is_finished(&self) -> bool {
        self.status == "finished"
    }
}

/// One operation's outcome inside the result archive.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationResult {
    pub status_code: u16,
    #[serde(default)]
    pub operation_id: Option<String>,
    /// The operation's response body, itself a JSON document.
    #[serde(default)]
    pub response: String,
}

impl OperationResult {
    pub fn body(&self) -> Result<Value, ApiError> {
        serde_json::from_str(&self.response).map_err(|e| {
            ApiError::Malformed(format!(
                "operation {}: undecodable response: {e}",
                self.operation_id.as_deref().unwrap_or("<unnamed>")
            ))
        })
    }
}

impl MailChimpClient {
    pub async fn submit_batch(&self, operations: &[BatchOperation]) -> Result<BatchStatus, ApiError> {
        let body = self
            .post_json("batches", &json!({ "operations": operations }))
            .await?;
        let status = parse_status(body)?;
        info!(
            batch_id = %status.id,
            operations = operations.len(),
            "Submitted batch"
        );
        Ok(status)
    }

    pub async fn batch_status(&self, batch_id: &str) -> Result<BatchStatus, ApiError> {
        let body = self.get_json(&format!("batches/{batch_id}"), &[]).await?;
        let status = parse_status(body)?;
        debug!(
            batch_id,
            status = %status.status,
            finished = status.finished_operations,
            total = status.total_operations,
            "Polled batch"
        );
        Ok(status)
    }

    /// Downloads and unpacks a finished batch's result archive.
    ///
    /// The URL is pre-signed, so no credentials are sent.
    pub async fn download_batch(&self, url: &str) -> Result<Vec<OperationResult>, ApiError> {
        let response = self.http.get(url).send().await?;
        let bytes = check_status(response).await?.bytes().await?;
        debug!(bytes = bytes.len(), "Downloaded batch archive");

        tokio::task::spawn_blocking(move || unpack_results(&bytes))
            .await
            .map_err(|e| ApiError::Malformed(format!("archive task failed: {e}")))?
    }
}

fn parse_status(body: Value) -> Result<BatchStatus, ApiError> {
    serde_json::from_value(body)
        .map_err(|e| ApiError::Malformed(format!("unexpected batch status body: {e}")))
}

/// Reads every JSON file in a `.tar.gz` archive as an array of results.
pub fn unpack_results(archive: &[u8]) -> Result<Vec<OperationResult>, ApiError> {
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let mut results = Vec::new();

    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let mut contents = String::new();
        entry.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            continue;
        }

        let batch: Vec<OperationResult> = serde_json::from_str(&contents)
            .map_err(|e| ApiError::Malformed(format!("undecodable batch result file: {e}")))?;
        results.extend(batch);
    }

    Ok(results)
}
