use crate::error::StateError;
use chrono::{DateTime, Duration, Utc};
use model::core::stream::StreamId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Keys that mark a state document as the structured form rather than the
/// legacy flat `{stream: bookmark}` map.
const STATE_KEYS: [&str; 4] = ["bookmarks", "current_run", "last_run", "currently_syncing"];

/// Progress of the tap across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TapState {
    /// Start of the run in progress. Present only while a run is unfinished.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub current_run: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub last_run: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_syncing: Option<String>,

    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamBookmark>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBookmark {
    /// Window start for the next incremental read.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp")]
    pub since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,

    /// Ids emitted this run; child streams partition over them.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partitions: BTreeMap<String, PartitionProgress>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionProgress {
    /// Records consumed from the partition so far.
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub done: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TapState {
    /// Builds state from a loaded document, accepting the legacy flat form.
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Null => Ok(TapState::default()),
            Value::Object(map) if STATE_KEYS.iter().any(|k| map.contains_key(*k)) => {
                Ok(serde_json::from_value(Value::Object(map))?)
            }
            Value::Object(map) => Ok(TapState {
                bookmarks: serde_json::from_value(Value::Object(map))?,
                ..TapState::default()
            }),
            other => Err(StateError::NotAnObject(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Starts a run at `now`, or resumes the interrupted one. Returns the
    /// run's start time and whether it is a resume.
    pub fn begin_run(&mut self, now: DateTime<Utc>) -> (DateTime<Utc>, bool) {
        match self.current_run {
            Some(started) => (started, true),
            None => {
                self.current_run = Some(now);
                (now, false)
            }
        }
    }

    pub fn bookmark(&self, stream: StreamId) -> Option<&StreamBookmark> {
        self.bookmarks.get(stream.as_str())
    }

    pub fn bookmark_mut(&mut self, stream: StreamId) -> &mut StreamBookmark {
        self.bookmarks.entry(stream.as_str().to_string()).or_default()
    }

    /// Lower bound for an incremental read: the stream's bookmark, else the
    /// previous run, else the configured start date, minus the lag.
    pub fn window_start(
        &self,
        stream: StreamId,
        start_date: Option<DateTime<Utc>>,
        lag: Duration,
    ) -> Option<DateTime<Utc>> {
        self.bookmark(stream)
            .and_then(|b| b.since)
            .or(self.last_run)
            .or(start_date)
            .map(|start| {
                start
                    .checked_sub_signed(lag)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            })
    }

    pub fn is_stream_done(&self, stream: StreamId) -> bool {
        self.bookmark(stream).is_some_and(|b| b.done)
    }

    pub fn set_currently_syncing(&mut self, stream: Option<StreamId>) {
        self.currently_syncing = stream.map(|s| s.to_string());
    }

    pub fn partition(&self, stream: StreamId, key: &str) -> PartitionProgress {
        self.bookmark(stream)
            .and_then(|b| b.partitions.get(key))
            .copied()
            .unwrap_or_default()
    }

    /// Adds `consumed` records to a partition's progress.
    pub fn advance_partition(&mut self, stream: StreamId, key: &str, consumed: u64) {
        let progress = self
            .bookmark_mut(stream)
            .partitions
            .entry(key.to_string())
            .or_default();
        progress.count += consumed;
    }

    /// Resets a partition that will be re-read from the beginning.
    pub fn restart_partition(&mut self, stream: StreamId, key: &str) {
        self.bookmark_mut(stream)
            .partitions
            .insert(key.to_string(), PartitionProgress::default());
    }

    pub fn complete_partition(&mut self, stream: StreamId, key: &str) {
        self.bookmark_mut(stream)
            .partitions
            .entry(key.to_string())
            .or_default()
            .done = true;
    }

    /// Records an emitted id. Returns `false` if it was already seen this run.
    pub fn record_id(&mut self, stream: StreamId, id: &str) -> bool {
        self.bookmark_mut(stream).ids.insert(id.to_string())
    }

    pub fn ids(&self, stream: StreamId) -> Vec<String> {
        self.bookmark(stream)
            .map(|b| b.ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Marks a stream finished and moves its window up to the run start.
    pub fn complete_stream(&mut self, stream: StreamId) {
        let current_run = self.current_run;
        let bookmark = self.bookmark_mut(stream);
        if current_run.is_some() {
            bookmark.since = current_run;
        }
        bookmark.partitions.clear();
        bookmark.done = true;
        self.currently_syncing = None;
    }

    /// Closes a run in which every stream succeeded.
    pub fn finalize_run(&mut self) {
        self.last_run = self.current_run.take();
        self.currently_syncing = None;
        for bookmark in self.bookmarks.values_mut() {
            bookmark.done = false;
            bookmark.ids.clear();
            bookmark.partitions.clear();
        }
    }
}

/// Optional timestamps serialized as RFC 3339 with a `Z` suffix and parsed
/// leniently.
mod timestamp {
    use chrono::{DateTime, Utc};
    use model::core::utils::{format_timestamp, parse_timestamp};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'"))),
        }
    }
}
