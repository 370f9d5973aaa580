//! Unified error types for forumcache.
//!
//! Every variant renders with a stable upper-case code prefix so log
//! aggregation can group failures without parsing the message.

use tokio_rusqlite::rusqlite;

/// Unified error type for the cache, tracker, and schedulers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an empty forum id).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A transaction could not be committed. The pending writes were rolled back.
    #[error("COMMIT_FAILED: {operation}: {source}")]
    CommitFailed {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored timestamp could not be parsed.
    #[error("CACHE_ERROR: invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    /// A referenced entity does not exist in the store.
    #[error("UNKNOWN_ENTITY: {0}")]
    UnknownEntity(String),

    /// The fetch collaborator failed (network, auth, or scrape error).
    #[error("FETCH_FAILED: {0}")]
    FetchFailed(String),
}

impl Error {
    /// Whether the failure is transient and worth retrying on the next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::FetchFailed(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
