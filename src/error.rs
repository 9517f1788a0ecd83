use std::fmt;

use thiserror::Error;

use crate::types::JobId;

/// Why a destination URL was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidUrlReason {
    Empty,
    MissingScheme,
    UnsupportedScheme,
    InvalidHost,
    InvalidPort,
    InvalidPath,
    /// Matched the grammar but the URL parser still refused it.
    Unparseable,
}

impl fmt::Display for InvalidUrlReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidUrlReason::Empty => write!(f, "url is empty"),
            InvalidUrlReason::MissingScheme => write!(f, "missing scheme"),
            InvalidUrlReason::UnsupportedScheme => {
                write!(f, "scheme must be http, https, ftp or ftps")
            }
            InvalidUrlReason::InvalidHost => write!(f, "malformed host"),
            InvalidUrlReason::InvalidPort => write!(f, "malformed port"),
            InvalidUrlReason::InvalidPath => write!(f, "malformed path or query"),
            InvalidUrlReason::Unparseable => write!(f, "url could not be parsed"),
        }
    }
}

/// Destination failed syntactic validation. No job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid destination url {url:?}: {reason}")]
pub struct InvalidUrlError {
    pub url: String,
    pub reason: InvalidUrlReason,
}

impl InvalidUrlError {
    pub(crate) fn new(url: &str, reason: InvalidUrlReason) -> Self {
        Self { url: url.to_string(), reason }
    }
}

/// Failures of the backing store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A job with this id already exists.
    #[error("job already exists: {0}")]
    Duplicate(JobId),

    /// The backend could not be reached or refused the operation.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Stored state could not be decoded.
    #[error("corrupt record for job {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

/// Errors returned when a job cannot be enqueued.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error(transparent)]
    InvalidUrl(#[from] InvalidUrlError),

    /// Caller-supplied id collides with an existing job.
    #[error("job already exists: {0}")]
    Duplicate(JobId),

    /// Queue unreachable; nothing was enqueued.
    #[error("enqueue failed: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for EnqueueError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Duplicate(id) => EnqueueError::Duplicate(id),
            other => EnqueueError::Storage(other),
        }
    }
}

/// Errors surfaced synchronously to a submitter.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidUrl(InvalidUrlError),

    #[error(transparent)]
    Enqueue(EnqueueError),
}

impl From<InvalidUrlError> for SubmitError {
    fn from(err: InvalidUrlError) -> Self {
        SubmitError::InvalidUrl(err)
    }
}

impl From<EnqueueError> for SubmitError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::InvalidUrl(err) => SubmitError::InvalidUrl(err),
            other => SubmitError::Enqueue(other),
        }
    }
}

/// Errors returned by status lookups and cancellation.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Anything other than HTTP 200.
    #[error("destination answered HTTP {0}")]
    UnexpectedStatus(u16),
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Rejected relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("queue name must not be empty")]
    EmptyQueueName,

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("delivery timeout must be greater than zero")]
    ZeroTimeout,

    /// A live attempt could be mistaken for a dead one.
    #[error("stalled_after must be longer than the delivery timeout")]
    StallWindowTooShort,
}

/// Errors starting the worker pool.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
