use model::core::stream::StreamId;
use std::fmt;

/// A collection resource of the Marketing API, relative to the API root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Lists,
    Campaigns,
    ListMembers { list_id: String },
    EmailActivity { campaign_id: String },
    MergeFields { list_id: String },
}

impl Endpoint {
    /// Resolves the endpoint a stream reads from. Child streams need the
    /// parent id that scopes the partition.
    pub fn for_stream(stream: StreamId, parent_id: Option<&str>) -> Option<Self> {
        match (stream, parent_id) {
            (StreamId::Lists, _) => Some(Endpoint::Lists),
            (StreamId::Campaigns, _) => Some(Endpoint::Campaigns),
            (StreamId::ListMembers, Some(id)) => Some(Endpoint::ListMembers {
                list_id: id.to_string(),
            }),
            (StreamId::EmailActivityReports, Some(id)) => Some(Endpoint::EmailActivity {
                campaign_id: id.to_string(),
            }),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Endpoint::Lists => "lists".to_string(),
            Endpoint::Campaigns => "campaigns".to_string(),
            Endpoint::ListMembers { list_id } => format!("lists/{list_id}/members"),
            Endpoint::EmailActivity { campaign_id } => {
                format!("reports/{campaign_id}/email-activity")
            }
            Endpoint::MergeFields { list_id } => format!("lists/{list_id}/merge-fields"),
        }
    }

    /// Key of the item array in a collection response.
    pub fn collection_key(&self) -> &'static str {
        match self {
            Endpoint::Lists => "lists",
            Endpoint::Campaigns => "campaigns",
            Endpoint::ListMembers { .. } => "members",
            Endpoint::EmailActivity { .. } => "emails",
            Endpoint::MergeFields { .. } => "merge_fields",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}
