//! A durable webhook relay.
//!
//! Callers hand over a JSON payload and a destination URL; the relay
//! stores a job and returns its id straight away. Workers then POST the
//! payload to the destination, retrying failed attempts on a schedule
//! until the destination answers `200 OK` or the attempts run out.
//!
//! ## Guarantees
//! - Submission never waits on the destination
//! - Durable jobs (Redis or Postgres backends)
//! - At-least-once, bounded retries
//! - One in-flight attempt per job, across any number of workers
//! - Status of every job is pollable by id
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Signing of outbound requests
//! - Rate limiting
//! - Long-term audit storage (payload snapshots expire)
//!
//! Authenticating submitters and validating inbound documents is the job
//! of the front end that owns a [`Relay`].

mod config;
mod destination;
mod error;
mod payload;
mod queue;
mod relay;
mod retry;
mod status;
mod storage;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use config::RelayConfig;
pub use destination::{validate, ValidUrl};
pub use error::{
    ConfigError,
    DeliveryFailure,
    DeliveryOutcome,
    EnqueueError,
    InvalidUrlError,
    InvalidUrlReason,
    StatusError,
    StorageError,
    SubmitError,
    WorkerError,
};
pub use payload::{PayloadStore, DEFAULT_PAYLOAD_TTL};
pub use queue::{DeliveryQueue, EnqueueOptions};
pub use relay::{Relay, SubmitOptions};
pub use retry::{apply_cancel, decide, recovered_status, BackoffStrategy, RetryPolicy, Transition, WORKER_LOST};
pub use status::StatusTracker;
pub use storage::{InMemoryStorage, SnapshotStorage, Storage};
pub use types::{DeliveryRequest, Job, JobHandle, JobId, JobStatus, Payload, PayloadRecord, RecordId};
pub use worker::{DeliveryClient, WorkerPool};

#[cfg(feature = "redis")]
pub use storage_redis::RedisStorage;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
