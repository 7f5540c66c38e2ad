use connectors::mailchimp::Endpoint;
use engine_config::settings::TapConfig;
use engine_core::{connectors::source::Partition, state::TapState};
use model::core::{
    stream::{ReplicationMethod, StreamId},
    utils::format_timestamp,
};

/// Splits a stream into the partitions this run must read.
///
/// Incremental filters are fixed here, so a partition reads the same window
/// however long it takes to fetch.
pub fn plan_partitions(stream: StreamId, config: &TapConfig, state: &TapState) -> Vec<Partition> {
    let since = match stream.replication() {
        ReplicationMethod::Incremental => state
            .window_start(stream, config.start_date, config.lag())
            .map(|start| format_timestamp(&start)),
        ReplicationMethod::FullTable => None,
    };

    match stream {
        StreamId::Lists => vec![Partition {
            key: "lists".into(),
            endpoint: Endpoint::Lists,
            filters: Vec::new(),
        }],
        StreamId::Campaigns => campaign_partitions(since),
        StreamId::ListMembers => child_partitions(stream, state, "since_last_changed", since),
        StreamId::EmailActivityReports => child_partitions(stream, state, "since", since),
    }
}

/// Campaigns are filtered twice, by creation and by send time, so that
/// campaigns sent after being created in an earlier window are picked up.
/// Without a window both filters would read everything, so one partition
/// does.
fn campaign_partitions(since: Option<String>) -> Vec<Partition> {
    let Some(since) = since else {
        return vec![Partition {
            key: "all".into(),
            endpoint: Endpoint::Campaigns,
            filters: Vec::new(),
        }];
    };

    ["since_create_time", "since_send_time"]
        .into_iter()
        .map(|filter| Partition {
            key: filter.into(),
            endpoint: Endpoint::Campaigns,
            filters: vec![(filter.into(), since.clone())],
        })
        .collect()
}

fn child_partitions(
    stream: StreamId,
    state: &TapState,
    filter: &str,
    since: Option<String>,
) -> Vec<Partition> {
    let Some(parent) = stream.parent() else {
        return Vec::new();
    };

    let filters: Vec<(String, String)> = since
        .map(|s| vec![(filter.to_string(), s)])
        .unwrap_or_default();

    state
        .ids(parent)
        .into_iter()
        .filter_map(|id| {
            Endpoint::for_stream(stream, Some(&id)).map(|endpoint| Partition {
                key: id,
                endpoint,
                filters: filters.clone(),
            })
        })
        .collect()
}
