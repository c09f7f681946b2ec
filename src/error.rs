//! Error kinds surfaced by the indexer

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The store file could not be opened or initialised.
    #[error("index store unavailable at {path:?}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A write kept colliding with other writers after the retry budget ran out.
    #[error("index store is busy")]
    StoreBusy,

    #[error("file is not in the index: {0:?}")]
    UnknownFile(PathBuf),

    #[error("bad query: {0}")]
    BadQuery(String),

    #[error("failed to parse {path:?}: {message}")]
    ParseFailure { path: PathBuf, message: String },

    #[error("failed to walk {path:?}: {message}")]
    WalkFailure { path: PathBuf, message: String },

    #[error("indexing is disabled")]
    IndexingDisabled,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// True for failures a caller may simply re-issue.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::StoreBusy)
    }
}
