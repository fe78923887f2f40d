use thiserror::Error;

/// Retrieval failure. Aborts the batch that hit it.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("record has no value for identity property '{0}'")]
    MissingIdentity(String),
    #[error("index file holds a '{found}' index, expected '{expected}'")]
    KindMismatch { expected: &'static str, found: String },
    #[error("unknown key function '{0}'")]
    UnknownKeyFunction(String),
    #[error("blocking key needs at least one part")]
    EmptyKey,
    #[error("index is closed")]
    Closed,
}
