use crate::{connectors::fetcher::Fetcher, connectors::source::Partition, error::SourceError};
use connectors::{
    error::ApiError,
    mailchimp::{
        batch::{BatchOperation, OperationResult},
        client::parse_page,
    },
};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

/// A bulk export of one partition through the batch operations API.
///
/// The job runs to completion on the first fetch; its items are then paged
/// out of memory.
pub struct ExportJob {
    poll_interval: Duration,
    max_wait: Duration,
    items: Option<Vec<Value>>,
}

impl ExportJob {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        ExportJob {
            poll_interval,
            max_wait,
            items: None,
        }
    }

    pub fn slice(&self, offset: usize, len: usize) -> Vec<Value> {
        self.items
            .as_deref()
            .unwrap_or_default()
            .iter()
            .skip(offset)
            .take(len)
            .cloned()
            .collect()
    }

    pub(crate) async fn ensure_loaded(
        &mut self,
        fetcher: &Fetcher,
        partition: &Partition,
        page_size: usize,
    ) -> Result<(), SourceError> {
        if self.items.is_none() {
            self.items = Some(self.run(fetcher, partition, page_size).await?);
        }
        Ok(())
    }

    async fn run(
        &self,
        fetcher: &Fetcher,
        partition: &Partition,
        page_size: usize,
    ) -> Result<Vec<Value>, SourceError> {
        let client = &fetcher.client;
        let endpoint = &partition.endpoint;
        let page_size = page_size.max(1);

        let total = fetcher
            .call(|| client.total_items(endpoint, &partition.filters))
            .await?;
        if total == 0 {
            debug!(partition = %partition.key, "Nothing to export");
            return Ok(Vec::new());
        }

        let operations: Vec<BatchOperation> = (0..total as usize)
            .step_by(page_size)
            .map(|offset| {
                BatchOperation::get(
                    &endpoint.path(),
                    client.page_query(endpoint, &partition.filters, offset, page_size),
                    operation_id(&partition.key, offset),
                )
            })
            .collect();

        let submitted = fetcher.call(|| client.submit_batch(&operations)).await?;
        let batch_id = submitted.id.clone();
        info!(
            partition = %partition.key,
            batch_id = %batch_id,
            total,
            operations = operations.len(),
            "Export job submitted"
        );

        let started = Instant::now();
        let mut status = submitted;
        while !status.is_finished() {
            if started.elapsed() >= self.max_wait {
                return Err(SourceError::Api(ApiError::BatchTimeout {
                    batch_id,
                    waited: started.elapsed(),
                }));
            }
            sleep(self.poll_interval).await;
            status = fetcher.call(|| client.batch_status(&batch_id)).await?;
        }

        let url = status.response_body_url.clone().ok_or_else(|| {
            SourceError::Api(ApiError::BatchFailed {
                batch_id: batch_id.clone(),
                detail: "finished without a response_body_url".into(),
            })
        })?;
        let results = fetcher.call(|| client.download_batch(&url)).await?;
        fetcher.metrics.increment_pages(results.len() as u64);

        let items = collect_items(&batch_id, partition, results)?;
        info!(
            partition = %partition.key,
            batch_id = %batch_id,
            records = items.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Export job finished"
        );
        Ok(items)
    }
}

fn operation_id(partition_key: &str, offset: usize) -> String {
    format!("{partition_key}:{offset}")
}

/// Offset encoded in an operation id; keys may themselves contain `:`.
fn operation_offset(operation_id: &str) -> Option<usize> {
    operation_id
        .rsplit_once(':')
        .and_then(|(_, offset)| offset.parse().ok())
}

/// Orders operation responses by offset and concatenates their items.
/// Any failed operation fails the whole export.
fn collect_items(
    batch_id: &str,
    partition: &Partition,
    results: Vec<OperationResult>,
) -> Result<Vec<Value>, SourceError> {
    let mut pages = Vec::with_capacity(results.len());
    for result in results {
        let op_id = result.operation_id.clone().unwrap_or_default();
        if result.status_code != 200 {
            let detail = result
                .body()
                .ok()
                .and_then(|body| body.get("detail").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            return Err(SourceError::Api(ApiError::BatchFailed {
                batch_id: batch_id.to_string(),
                detail: format!("operation '{op_id}' returned {}: {detail}", result.status_code),
            }));
        }

        let offset = operation_offset(&op_id).ok_or_else(|| {
            SourceError::Api(ApiError::Malformed(format!(
                "batch {batch_id}: unexpected operation id '{op_id}'"
            )))
        })?;
        let body = result.body().map_err(SourceError::Api)?;
        let page = parse_page(&partition.endpoint, body).map_err(SourceError::Api)?;
        pages.push((offset, page.items));
    }

    pages.sort_by_key(|(offset, _)| *offset);
    Ok(pages.into_iter().flat_map(|(_, items)| items).collect())
}
