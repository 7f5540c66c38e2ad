use super::lenient::{opt_bool, opt_u64};
use serde::Deserialize;

/// The config file as written by the user, before defaults and validation.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    pub user_name: Option<String>,
    pub api_key: Option<String>,
    pub credentials: Option<RawCredentials>,
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub start_date: Option<String>,

    #[serde(default, deserialize_with = "opt_u64")]
    pub lag: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub request_timeout: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub max_run_time: Option<u64>,

    #[serde(default, deserialize_with = "opt_bool")]
    pub keep_links: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub use_export: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub use_list_member_export: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub use_email_activity_export: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub include_empty_activity: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub interests_array: Option<bool>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub merge_fields_array: Option<bool>,

    pub streams: Option<Vec<String>>,

    #[serde(default, deserialize_with = "opt_u64")]
    pub max_retries: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub export_poll_interval: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub export_max_wait: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub state_flush_interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCredentials {
    pub user_name: Option<String>,
    pub api_key: Option<String>,
}
