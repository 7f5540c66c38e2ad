use super::{error::ConfigError, raw::RawConfig};
use chrono::{DateTime, Utc};
use model::core::{stream::StreamId, utils::parse_timestamp};
use std::{collections::BTreeSet, time::Duration};
use tracing::debug;

pub const DEFAULT_LAG_DAYS: u64 = 3;
pub const DEFAULT_COUNT: usize = 500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_USE_EXPORT: bool = true;
pub const DEFAULT_MAX_RETRIES: usize = 5;
pub const DEFAULT_EXPORT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_EXPORT_MAX_WAIT_SECS: u64 = 3600;
pub const DEFAULT_STATE_FLUSH_INTERVAL_SECS: u64 = 60;

/// Largest page the API will serve.
pub const MAX_COUNT: usize = 1000;
/// A century of lag already reaches before any Mailchimp data.
pub const MAX_LAG_DAYS: u64 = 36_500;
/// One year, in minutes.
pub const MAX_RUN_TIME_MINUTES: u64 = 525_600;

/// Immutable, validated configuration used throughout the sync.
#[derive(Debug, Clone)]
pub struct TapConfig {
    pub user_name: String,
    pub api_key: String,
    /// API root, e.g. `https://us3.api.mailchimp.com/3.0`.
    pub base_url: String,
    pub user_agent: String,
    /// Earliest timestamp for incremental streams; `None` replays all history.
    pub start_date: Option<DateTime<Utc>>,
    /// Days subtracted from each incremental window start.
    pub lag_days: u64,
    /// Page size for direct reads and for each bulk-export operation.
    pub count: usize,
    pub request_timeout: Duration,
    pub max_run_time: Option<Duration>,
    pub keep_links: bool,
    pub use_list_member_export: bool,
    pub use_email_activity_export: bool,
    pub include_empty_activity: bool,
    pub interests_array: bool,
    pub merge_fields_array: bool,
    pub streams: BTreeSet<StreamId>,
    pub max_retries: usize,
    pub export_poll_interval: Duration,
    pub export_max_wait: Duration,
    pub state_flush_interval: Duration,
}

impl TapConfig {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let creds = raw.credentials.unwrap_or_default();
        let user_name = required(raw.user_name, creds.user_name, "user_name")?;
        let api_key = required(raw.api_key, creds.api_key, "api_key")?;
        let base_url = resolve_base_url(raw.base_url, &api_key)?;

        let count = raw.count.map(|c| c as usize).unwrap_or(DEFAULT_COUNT);
        if count == 0 || count > MAX_COUNT {
            return Err(ConfigError::InvalidValue {
                key: "count",
                reason: format!("must be between 1 and {MAX_COUNT}, got {count}"),
            });
        }

        let request_timeout = raw
            .request_timeout
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout",
                reason: "must be greater than zero".into(),
            });
        }

        let lag_days = raw.lag.unwrap_or(DEFAULT_LAG_DAYS);
        if lag_days > MAX_LAG_DAYS {
            return Err(ConfigError::InvalidValue {
                key: "lag",
                reason: format!("must be at most {MAX_LAG_DAYS} days, got {lag_days}"),
            });
        }

        let max_run_time = raw.max_run_time.unwrap_or(0);
        if max_run_time > MAX_RUN_TIME_MINUTES {
            return Err(ConfigError::InvalidValue {
                key: "max_run_time",
                reason: format!(
                    "must be at most {MAX_RUN_TIME_MINUTES} minutes, got {max_run_time}"
                ),
            });
        }

        let use_export = raw.use_export.unwrap_or(DEFAULT_USE_EXPORT);
        let streams = parse_streams(raw.streams)?;

        Ok(TapConfig {
            user_name,
            api_key,
            base_url,
            user_agent: raw
                .user_agent
                .unwrap_or_else(|| format!("tap-mailchimp/{}", env!("CARGO_PKG_VERSION"))),
            start_date: parse_start_date(raw.start_date.as_deref())?,
            lag_days,
            count,
            request_timeout: Duration::from_secs(request_timeout),
            max_run_time: (max_run_time > 0).then(|| Duration::from_secs(max_run_time * 60)),
            keep_links: raw.keep_links.unwrap_or(false),
            use_list_member_export: raw.use_list_member_export.unwrap_or(use_export),
            use_email_activity_export: raw.use_email_activity_export.unwrap_or(use_export),
            include_empty_activity: raw.include_empty_activity.unwrap_or(false),
            interests_array: raw.interests_array.unwrap_or(true),
            merge_fields_array: raw.merge_fields_array.unwrap_or(true),
            streams,
            max_retries: raw
                .max_retries
                .map(|r| (r as usize).max(1))
                .unwrap_or(DEFAULT_MAX_RETRIES),
            export_poll_interval: Duration::from_secs(
                raw.export_poll_interval
                    .unwrap_or(DEFAULT_EXPORT_POLL_INTERVAL_SECS),
            ),
            export_max_wait: Duration::from_secs(
                raw.export_max_wait.unwrap_or(DEFAULT_EXPORT_MAX_WAIT_SECS),
            ),
            state_flush_interval: Duration::from_secs(
                raw.state_flush_interval
                    .unwrap_or(DEFAULT_STATE_FLUSH_INTERVAL_SECS),
            ),
        })
    }

    /// Enabled streams, in dependency order.
    pub fn enabled_streams(&self) -> Vec<StreamId> {
        self.streams.iter().copied().collect()
    }

    /// Narrows the enabled streams, e.g. to the streams selected in a catalog.
    pub fn restrict_streams(
        &mut self,
        selected: impl IntoIterator<Item = StreamId>,
    ) -> Result<(), ConfigError> {
        let selected: BTreeSet<StreamId> = selected.into_iter().collect();
        let narrowed: BTreeSet<StreamId> = self.streams.intersection(&selected).copied().collect();
        check_parents(&narrowed)?;
        self.streams = narrowed;
        Ok(())
    }

    /// Whether the stream reads through the bulk-export path.
    pub fn uses_export(&self, stream: StreamId) -> bool {
        match stream {
            StreamId::ListMembers => self.use_list_member_export,
            StreamId::EmailActivityReports => self.use_email_activity_export,
            StreamId::Lists | StreamId::Campaigns => false,
        }
    }

    pub fn lag(&self) -> chrono::Duration {
        chrono::Duration::days(self.lag_days as i64)
    }
}

fn required(
    top_level: Option<String>,
    nested: Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    top_level
        .or(nested)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingKey(key))
}

fn resolve_base_url(base_url: Option<String>, api_key: &str) -> Result<String, ConfigError> {
    if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
        return Ok(url.trim().trim_end_matches('/').to_string());
    }

    let dc = api_key
        .rsplit_once('-')
        .map(|(_, dc)| dc)
        .filter(|dc| !dc.is_empty() && dc.chars().all(|c| c.is_ascii_alphanumeric()))
        .ok_or(ConfigError::MissingDatacenter)?;

    Ok(format!("https://{dc}.api.mailchimp.com/3.0"))
}

fn parse_start_date(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ConfigError> {
    match raw.map(str::trim) {
        None | Some("") | Some("*") => {
            debug!("No start_date configured, incremental streams replay all history");
            Ok(None)
        }
        Some(value) => parse_timestamp(value)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "start_date",
                reason: format!("'{value}' is not a recognised timestamp"),
            }),
    }
}

fn parse_streams(raw: Option<Vec<String>>) -> Result<BTreeSet<StreamId>, ConfigError> {
    let streams = match raw {
        None => StreamId::ALL.into_iter().collect(),
        Some(names) => names
            .iter()
            .map(|name| {
                name.parse::<StreamId>()
                    .map_err(|_| ConfigError::UnknownStream(name.clone()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?,
    };

    check_parents(&streams)?;
    Ok(streams)
}

fn check_parents(streams: &BTreeSet<StreamId>) -> Result<(), ConfigError> {
    for stream in streams {
        if let Some(parent) = stream.parent()
            && !streams.contains(&parent)
        {
            return Err(ConfigError::ParentDisabled {
                child: stream.to_string(),
                parent: parent.to_string(),
            });
        }
    }
    Ok(())
}
