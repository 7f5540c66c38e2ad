use crate::{error::ApiError, mailchimp::endpoint::Endpoint};
use reqwest::{Response, StatusCode, header::RETRY_AFTER};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::debug;

/// Page size used for small auxiliary collections such as merge fields.
const AUX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub user_name: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Ask the API to leave out `_links` hypermedia on every request.
    pub exclude_links: bool,
}

/// One page of a collection response.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub total_items: Option<u64>,
}

/// Thin async client over the Mailchimp Marketing API v3.
///
/// Every call is a single HTTP round-trip; retries are the caller's concern.
#[derive(Clone)]
pub struct MailChimpClient {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    user_name: String,
    api_key: String,
    exclude_links: bool,
    pub(crate) schema_cache: Arc<Mutex<HashMap<String, Value>>>,
}

impl MailChimpClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ApiError> {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|_| ApiError::InvalidUrl(base_url.clone()))?;

        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent)
            .timeout(settings.timeout)
            .build()?;

        Ok(MailChimpClient {
            http,
            base_url,
            user_name: settings.user_name,
            api_key: settings.api_key,
            exclude_links: settings.exclude_links,
            schema_cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Query parameters for one page of `endpoint`, shared by direct reads
    /// and batch operations so both modes request identical pages.
    pub fn page_query(
        &self,
        endpoint: &Endpoint,
        filters: &[(String, String)],
        offset: usize,
        count: usize,
    ) -> Vec<(String, String)> {
        let mut query = filters.to_vec();
        query.push(("count".into(), count.to_string()));
        query.push(("offset".into(), offset.to_string()));
        if self.exclude_links {
            query.push(("exclude_fields".into(), self.excluded_fields(endpoint)));
        }
        query
    }

    fn excluded_fields(&self, endpoint: &Endpoint) -> String {
        format!("_links,{}._links", endpoint.collection_key())
    }

    pub async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        debug!(path, ?query, "GET");
        let response = self
            .http
            .get(self.url(path))
            .basic_auth(&self.user_name, Some(&self.api_key))
            .query(query)
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .basic_auth(&self.user_name, Some(&self.api_key))
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn get_page(
        &self,
        endpoint: &Endpoint,
        filters: &[(String, String)],
        offset: usize,
        count: usize,
    ) -> Result<Page, ApiError> {
        let query = self.page_query(endpoint, filters, offset, count);
        let body = self.get_json(&endpoint.path(), &query).await?;
        parse_page(endpoint, body)
    }

    /// Size of the filtered collection, fetched without any items.
    pub async fn total_items(
        &self,
        endpoint: &Endpoint,
        filters: &[(String, String)],
    ) -> Result<u64, ApiError> {
        let mut query = filters.to_vec();
        query.push(("fields".into(), "total_items".into()));
        let body = self.get_json(&endpoint.path(), &query).await?;
        body.get("total_items")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::Malformed(format!("{endpoint}: missing 'total_items'")))
    }

    /// All merge-field definitions of a list.
    pub async fn merge_fields(&self, list_id: &str) -> Result<Vec<Value>, ApiError> {
        let endpoint = Endpoint::MergeFields {
            list_id: list_id.to_string(),
        };

        let mut fields = Vec::new();
        loop {
            let page = self
                .get_page(&endpoint, &[], fields.len(), AUX_PAGE_SIZE)
                .await?;
            let fetched = page.items.len();
            fields.extend(page.items);

            let reached_total = page
                .total_items
                .is_some_and(|total| fields.len() as u64 >= total);
            if fetched == 0 || reached_total {
                break;
            }
        }

        debug!(list_id, count = fields.len(), "Fetched merge fields");
        Ok(fields)
    }
}

/// Extracts the item array and total from a collection body.
pub fn parse_page(endpoint: &Endpoint, body: Value) -> Result<Page, ApiError> {
    let key = endpoint.collection_key();
    let total_items = body.get("total_items").and_then(Value::as_u64);
    match body {
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(Page { items, total_items }),
            _ => Err(ApiError::Malformed(format!(
                "{endpoint}: response has no '{key}' array"
            ))),
        },
        _ => Err(ApiError::Malformed(format!(
            "{endpoint}: response is not a JSON object"
        ))),
    }
}

pub(crate) async fn read_json(response: Response) -> Result<Value, ApiError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Malformed(format!("undecodable JSON body: {e}")))
}

/// Maps a non-success status onto the error taxonomy.
pub(crate) async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let url = response.url().to_string();
    let detail = problem_detail(response.text().await.unwrap_or_default());
    let code = status.as_u16();

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth {
            status: code,
            detail,
        },
        StatusCode::NOT_FOUND => ApiError::NotFound(format!("{url}: {detail}")),
        s if s.is_server_error() => ApiError::Server {
            status: code,
            detail,
        },
        _ => ApiError::Client {
            status: code,
            detail,
        },
    })
}

/// The API answers errors with RFC 7807 problem documents.
fn problem_detail(body: String) -> String {
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("detail")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}
