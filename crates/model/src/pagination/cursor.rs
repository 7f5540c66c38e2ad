/// Represents the pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    /// No cursor specified, start from the first record.
    #[default]
    None,

    /// Offset into the collection, counted in records.
    Offset { offset: usize },
}

impl Cursor {
    pub fn offset(&self) -> usize {
        match self {
            Cursor::None => 0,
            Cursor::Offset { offset } => *offset,
        }
    }

    pub fn advance(&self, by: usize) -> Cursor {
        Cursor::Offset {
            offset: self.offset() + by,
        }
    }
}
