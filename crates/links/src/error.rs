use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkStoreError {
    #[error("link storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("invalid link: {0}")]
    InvalidLink(String),
    /// A stored row that cannot be decoded.
    #[error("corrupt link row ({id1}, {id2}): {message}")]
    CorruptRow { id1: String, id2: String, message: String },
    #[error("link store is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum LinkFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link file error: {0}")]
    Csv(#[from] csv::Error),
    #[error("link file has no rows")]
    Empty,
    #[error(transparent)]
    Store(#[from] LinkStoreError),
}

/// A link-file row that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: u64,
    pub message: String,
}
