use std::time::Duration;
use thiserror::Error;

use crate::model::Platform;

/// Fetch, auth or transport failure of one source. Never fatal to a run.
#[derive(Debug, Clone, Error)]
#[error("adapter for {source_id} failed: {cause}")]
pub struct AdapterError {
    pub source_id: String,
    pub cause: String,
}

impl AdapterError {
    pub fn new(source_id: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            source_id: source_id.into(),
            cause: cause.to_string(),
        }
    }

    pub fn timeout(source_id: impl Into<String>, after: Duration) -> Self {
        Self::new(source_id, format!("timed out after {after:?}"))
    }
}

/// A raw record the normalizer cannot map. Item-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("record has neither text nor url to derive an identity from")]
    MissingIdentity,

    #[error("comment has no text")]
    EmptyComment,

    #[error("unparseable timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("record platform {found} does not match source platform {expected}")]
    PlatformMismatch { expected: Platform, found: Platform },
}

#[derive(Debug, Clone, Error)]
pub enum ClassificationError {
    #[error("nothing to classify")]
    EmptyText,

    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classification failed: {0}")]
    Failed(String),
}

/// Store failure other than the expected duplicate-key case.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("store call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("stored row is unreadable: {0}")]
    InvalidRow(String),

    #[error("store task aborted: {0}")]
    Task(String),
}

impl From<diesel::r2d2::PoolError> for PersistenceError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        PersistenceError::Pool(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        PersistenceError::Task(err.to_string())
    }
}

/// Moderation log unavailable. Never rolls back the stored comment.
#[derive(Debug, Error)]
pub enum ModerationWriteError {
    #[error("moderation log io: {0}")]
    Io(#[from] std::io::Error),

    #[error("moderation log encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("moderation log lock poisoned")]
    Poisoned,

    #[error("moderation task aborted: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ModerationWriteError {
    fn from(err: tokio::task::JoinError) -> Self {
        ModerationWriteError::Task(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("another run is already in progress")]
    AlreadyRunning,
}

/// Why a source ended up `Failed`.
#[derive(Debug, Error)]
pub enum SourceFailure {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("could not record source: {0}")]
    SourceRow(PersistenceError),

    #[error("gave up after {count} consecutive item failures, last: {last}")]
    TooManyFailures { count: usize, last: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("run cancelled before source started")]
    NotStarted,
}
