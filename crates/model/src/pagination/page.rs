use crate::{pagination::cursor::Cursor, records::record::Record};

/// One page of records returned by a fetch adapter.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub records: Vec<Record>,
    /// Where the next fetch should start. `None` once the source is drained.
    pub next_cursor: Option<Cursor>,
    pub reached_end: bool,
}

impl FetchResult {
    pub fn page(records: Vec<Record>, cursor: Cursor) -> Self {
        if records.is_empty() {
            return FetchResult::end();
        }

        let next = cursor.advance(records.len());
        FetchResult {
            records,
            next_cursor: Some(next),
            reached_end: false,
        }
    }

    pub fn end() -> Self {
        FetchResult {
            records: Vec::new(),
            next_cursor: None,
            reached_end: true,
        }
    }

    pub fn row_count(&self) -> usize {
        self.records.len()
    }
}
