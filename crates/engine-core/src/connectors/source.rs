use crate::{
    connectors::{export::ExportJob, fetcher::Fetcher},
    error::SourceError,
};
use connectors::mailchimp::Endpoint;
use model::{
    core::stream::StreamId,
    pagination::{cursor::Cursor, page::FetchResult},
    records::record::Record,
};
use std::fmt;
use tracing::debug;

/// One independently resumable slice of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Key under which progress is stored in the stream's bookmark.
    pub key: String,
    pub endpoint: Endpoint,
    /// `since_*` filters, fixed when the partition is planned.
    pub filters: Vec<(String, String)>,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.endpoint, self.key)
    }
}

/// How a partition's records are obtained.
pub enum DataSource {
    /// Synchronous `count`/`offset` pages.
    Paged,
    /// Asynchronous batch job; the results are served from memory.
    Export(ExportJob),
}

pub struct Source {
    pub stream: StreamId,
    pub partition: Partition,
    pub primary: DataSource,
    fetcher: Fetcher,
}

impl Source {
    pub fn paged(stream: StreamId, partition: Partition, fetcher: Fetcher) -> Self {
        Source {
            stream,
            partition,
            primary: DataSource::Paged,
            fetcher,
        }
    }

    pub fn export(stream: StreamId, partition: Partition, fetcher: Fetcher, job: ExportJob) -> Self {
        Source {
            stream,
            partition,
            primary: DataSource::Export(job),
            fetcher,
        }
    }

    pub fn is_export(&self) -> bool {
        matches!(self.primary, DataSource::Export(_))
    }

    /// Fetches the page starting at `cursor`. A page with no records ends the
    /// partition; the caller must not ask again after `reached_end`.
    pub async fn fetch_data(
        &mut self,
        batch_size: usize,
        cursor: Cursor,
    ) -> Result<FetchResult, SourceError> {
        let offset = cursor.offset();
        let items = match &mut self.primary {
            DataSource::Paged => {
                let page = self
                    .fetcher
                    .page(
                        &self.partition.endpoint,
                        &self.partition.filters,
                        offset,
                        batch_size,
                    )
                    .await?;
                page.items
            }
            DataSource::Export(job) => {
                job.ensure_loaded(&self.fetcher, &self.partition, batch_size)
                    .await?;
                job.slice(offset, batch_size)
            }
        };

        debug!(
            stream = %self.stream,
            partition = %self.partition.key,
            offset,
            records = items.len(),
            "Fetched page"
        );

        let records = items
            .into_iter()
            .map(Record::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FetchResult::page(records, cursor))
    }
}
