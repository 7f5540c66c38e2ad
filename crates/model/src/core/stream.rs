use crate::core::errors::ModelError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How a stream is replicated between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    FullTable,
    Incremental,
}

/// The resources exposed by the tap.
///
/// Variants are declared in dependency order: a parent always sorts before
/// the streams that read ids from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Lists,
    Campaigns,
    ListMembers,
    EmailActivityReports,
}

impl StreamId {
    pub const ALL: [StreamId; 4] = [
        StreamId::Lists,
        StreamId::Campaigns,
        StreamId::ListMembers,
        StreamId::EmailActivityReports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamId::Lists => "lists",
            StreamId::Campaigns => "campaigns",
            StreamId::ListMembers => "list_members",
            StreamId::EmailActivityReports => "email_activity_reports",
        }
    }

    /// Dotted API resource name, used to locate the stream's JSON schema.
    pub fn api_resource(&self) -> &'static str {
        match self {
            StreamId::Lists => "lists",
            StreamId::Campaigns => "campaigns",
            StreamId::ListMembers => "lists.members",
            StreamId::EmailActivityReports => "reports.email_activity",
        }
    }

    pub fn parent(&self) -> Option<StreamId> {
        match self {
            StreamId::ListMembers => Some(StreamId::Lists),
            StreamId::EmailActivityReports => Some(StreamId::Campaigns),
            _ => None,
        }
    }

    pub fn key_properties(&self) -> &'static [&'static str] {
        match self {
            StreamId::EmailActivityReports => &["campaign_id", "email_id"],
            _ => &["id"],
        }
    }

    pub fn bookmark_properties(&self) -> &'static [&'static str] {
        match self {
            StreamId::Lists => &[],
            StreamId::Campaigns => &["send_time"],
            StreamId::ListMembers => &["last_changed"],
            StreamId::EmailActivityReports => &["activity"],
        }
    }

    pub fn replication(&self) -> ReplicationMethod {
        match self {
            StreamId::Lists => ReplicationMethod::FullTable,
            _ => ReplicationMethod::Incremental,
        }
    }

    /// Whether child streams need the ids this stream emits.
    pub fn tracks_ids(&self) -> bool {
        StreamId::ALL.iter().any(|s| s.parent() == Some(*self))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStream(s.to_string()))
    }
}
