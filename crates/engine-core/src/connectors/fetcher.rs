use crate::{
    error::SourceError,
    metrics::Metrics,
    retry::{RetryDisposition, RetryPolicy, classify_api_error},
};
use connectors::{
    error::ApiError,
    mailchimp::{Endpoint, MailChimpClient, Page},
};
use serde_json::Value;
use std::future::Future;

/// The API client paired with the retry policy and metrics every call
/// goes through.
#[derive(Clone)]
pub struct Fetcher {
    pub client: MailChimpClient,
    pub retry: RetryPolicy,
    pub metrics: Metrics,
}

impl Fetcher {
    pub fn new(client: MailChimpClient, retry: RetryPolicy, metrics: Metrics) -> Self {
        Fetcher {
            client,
            retry,
            metrics,
        }
    }

    /// Runs one HTTP call under the retry policy.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let metrics = &self.metrics;
        self.retry
            .run(
                || {
                    metrics.increment_requests(1);
                    op()
                },
                |err| {
                    let disposition = classify_api_error(err);
                    if disposition != RetryDisposition::Stop {
                        metrics.increment_retries(1);
                    }
                    disposition
                },
            )
            .await
            .map_err(SourceError::from)
    }

    pub async fn page(
        &self,
        endpoint: &Endpoint,
        filters: &[(String, String)],
        offset: usize,
        count: usize,
    ) -> Result<Page, SourceError> {
        let page = self
            .call(|| self.client.get_page(endpoint, filters, offset, count))
            .await?;
        self.metrics.increment_pages(1);
        Ok(page)
    }

    pub async fn merge_fields(&self, list_id: &str) -> Result<Vec<Value>, SourceError> {
        self.call(|| self.client.merge_fields(list_id)).await
    }

    pub async fn schema(&self, api_resource: &str) -> Result<Value, SourceError> {
        self.call(|| self.client.fetch_schema(api_resource)).await
    }
}
