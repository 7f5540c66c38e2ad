use connectors::mailchimp::{ClientSettings, MailChimpClient};
use engine_config::settings::TapConfig;
use engine_core::{
    connectors::{
        export::ExportJob,
        fetcher::Fetcher,
        source::{Partition, Source},
    },
    metrics::Metrics,
    retry::RetryPolicy,
};
use model::core::stream::StreamId;

pub fn create_fetcher(config: &TapConfig, metrics: Metrics) -> Result<Fetcher, connectors::error::ApiError> {
    let client = MailChimpClient::new(ClientSettings {
        base_url: config.base_url.clone(),
        user_name: config.user_name.clone(),
        api_key: config.api_key.clone(),
        user_agent: config.user_agent.clone(),
        timeout: config.request_timeout,
        exclude_links: !config.keep_links,
    })?;
    Ok(Fetcher::new(
        client,
        RetryPolicy::for_http(config.max_retries),
        metrics,
    ))
}

/// Picks the read strategy for one partition of `stream`.
pub fn create_source(
    config: &TapConfig,
    fetcher: &Fetcher,
    stream: StreamId,
    partition: Partition,
) -> Source {
    if config.uses_export(stream) {
        let job = ExportJob::new(config.export_poll_interval, config.export_max_wait);
        Source::export(stream, partition, fetcher.clone(), job)
    } else {
        Source::paged(stream, partition, fetcher.clone())
    }
}
