use matchbook_core::{ConfigError, Mode};
use matchbook_index::IndexError;
use matchbook_links::{LinkFileError, LinkStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Candidate retrieval or index storage failed. The batch in flight was
    /// aborted.
    #[error("retrieval error: {0}")]
    Index(#[from] IndexError),
    #[error(transparent)]
    Links(#[from] LinkStoreError),
    #[error(transparent)]
    LinkFile(#[from] LinkFileError),
    /// Engine settings failed to parse or validate.
    #[error("settings error: {0}")]
    Settings(String),
    /// The entry point does not fit the configuration's mode.
    #[error("{operation} needs a {expected:?} configuration, got {actual:?}")]
    ModeMismatch { operation: &'static str, expected: Mode, actual: Mode },
    #[error("processing cancelled")]
    Cancelled,
}
