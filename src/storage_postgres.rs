#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use std::time::Duration;
#[cfg(feature = "postgres")]
use tokio_postgres::{Client, Row};

#[cfg(feature = "postgres")]
use crate::error::StorageError;
#[cfg(feature = "postgres")]
use crate::retry::{Transition, WORKER_LOST};
#[cfg(feature = "postgres")]
use crate::storage::{SnapshotStorage, Storage};
#[cfg(feature = "postgres")]
use crate::types::{duration_ms, now_ms, Job, JobId, JobStatus, PayloadRecord, RecordId};

#[cfg(feature = "postgres")]
const JOB_COLUMNS: &str = "id, request, retry, status, attempts, max_attempts, \
                           enqueued_at, ready_at, updated_at, last_error, cancel_requested";

/// Postgres-backed queue and snapshot store.
///
/// Jobs of many queues share one table, keyed by queue name. Claims use
/// `FOR UPDATE SKIP LOCKED`, so concurrent workers never block each other
/// on the same row.
#[cfg(feature = "postgres")]
pub struct PostgresStorage {
    client: Client,
    queue: String,
}

#[cfg(feature = "postgres")]
impl PostgresStorage {
    /// Wrap a connected client, creating the tables if needed.
    pub async fn new(client: Client, queue_name: impl Into<String>) -> Result<Self, StorageError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_relay_jobs (
                    queue TEXT NOT NULL,
                    id TEXT NOT NULL,
                    request JSON NOT NULL,
                    retry JSON NOT NULL,
                    status TEXT NOT NULL,
                    attempts INT NOT NULL DEFAULT 0,
                    max_attempts INT NOT NULL,
                    enqueued_at BIGINT NOT NULL,
                    ready_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    last_error TEXT,
                    cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
                    PRIMARY KEY (queue, id)
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE INDEX IF NOT EXISTS webhook_relay_jobs_ready
                 ON webhook_relay_jobs (queue, status, ready_at)",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_relay_payloads (
                    id TEXT PRIMARY KEY,
                    record JSON NOT NULL,
                    expires_at BIGINT NOT NULL
                )",
                &[],
            )
            .await?;

        Ok(Self {
            client,
            queue: queue_name.into(),
        })
    }

    fn job_from_row(row: &Row) -> Result<Job, StorageError> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<JobStatus>()
            .map_err(|message| StorageError::Corrupt { id: id.clone(), message })?;

        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;
        let enqueued_at: i64 = row.try_get("enqueued_at")?;
        let ready_at: i64 = row.try_get("ready_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        Ok(Job {
            id: JobId(id),
            request: serde_json::from_value(row.try_get("request")?)?,
            retry: serde_json::from_value(row.try_get("retry")?)?,
            max_attempts: max_attempts.max(0) as u32,
            attempt_count: attempts.max(0) as u32,
            status,
            enqueued_at_ms: enqueued_at.max(0) as u64,
            ready_at_ms: ready_at.max(0) as u64,
            updated_at_ms: updated_at.max(0) as u64,
            last_error: row.try_get("last_error")?,
            cancel_requested: row.try_get("cancel_requested")?,
        })
    }

    fn status_from_row(id: &JobId, row: &Row) -> Result<JobStatus, StorageError> {
        let status: String = row.try_get("status")?;
        status.parse::<JobStatus>().map_err(|message| StorageError::Corrupt {
            id: id.0.clone(),
            message,
        })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Storage for PostgresStorage {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let request = serde_json::to_value(&job.request)?;
        let retry = serde_json::to_value(&job.retry)?;

        let inserted = self
            .client
            .execute(
                "INSERT INTO webhook_relay_jobs
                    (queue, id, request, retry, status, attempts, max_attempts,
                     enqueued_at, ready_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $9)
                 ON CONFLICT (queue, id) DO NOTHING",
                &[
                    &self.queue,
                    &job.id.0,
                    &request,
                    &retry,
                    &job.status.as_str(),
                    &(job.max_attempts as i32),
                    &(job.enqueued_at_ms as i64),
                    &(job.ready_at_ms as i64),
                    &(job.updated_at_ms as i64),
                ],
            )
            .await?;

        if inserted == 0 {
            return Err(StorageError::Duplicate(job.id.clone()));
        }
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {JOB_COLUMNS} FROM webhook_relay_jobs WHERE queue = $1 AND id = $2"),
                &[&self.queue, &id.0],
            )
            .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn claim_next(&self, now_ms: u64) -> Result<Option<Job>, StorageError> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "UPDATE webhook_relay_jobs
                     SET status = 'started', attempts = attempts + 1, updated_at = $2
                     WHERE queue = $1 AND id = (
                         SELECT id FROM webhook_relay_jobs
                         WHERE queue = $1
                           AND status IN ('queued', 'deferred', 'scheduled')
                           AND ready_at <= $2
                         ORDER BY ready_at, id
                         LIMIT 1
                         FOR UPDATE SKIP LOCKED
                     )
                     RETURNING {JOB_COLUMNS}"
                ),
                &[&self.queue, &(now_ms as i64)],
            )
            .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn finish_attempt(
        &self,
        id: &JobId,
        attempt: u32,
        transition: &Transition,
    ) -> Result<Option<JobStatus>, StorageError> {
        let row = self
            .client
            .query_opt(
                "UPDATE webhook_relay_jobs
                 SET status = CASE
                         WHEN cancel_requested AND $4::text IN ('queued', 'deferred', 'scheduled')
                         THEN 'stopped'
                         ELSE $4::text
                     END,
                     ready_at = CASE
                         WHEN NOT cancel_requested AND $4::text = 'deferred' THEN $5
                         ELSE ready_at
                     END,
                     updated_at = $6,
                     last_error = $7
                 WHERE queue = $1 AND id = $2 AND status = 'started' AND attempts = $3
                 RETURNING status",
                &[
                    &self.queue,
                    &id.0,
                    &(attempt as i32),
                    &transition.status.as_str(),
                    &(transition.ready_at_ms as i64),
                    &(transition.at_ms as i64),
                    &transition.last_error,
                ],
            )
            .await?;

        row.as_ref().map(|row| Self::status_from_row(id, row)).transpose()
    }

    async fn cancel(&self, id: &JobId, now_ms: u64) -> Result<Option<JobStatus>, StorageError> {
        let row = self
            .client
            .query_opt(
                "UPDATE webhook_relay_jobs
                 SET status = CASE
                         WHEN status IN ('queued', 'deferred', 'scheduled') THEN 'stopped'
                         ELSE status
                     END,
                     cancel_requested = cancel_requested OR status = 'started',
                     updated_at = CASE
                         WHEN status IN ('queued', 'deferred', 'scheduled') THEN $3
                         ELSE updated_at
                     END
                 WHERE queue = $1 AND id = $2
                 RETURNING status",
                &[&self.queue, &id.0, &(now_ms as i64)],
            )
            .await?;

        row.as_ref().map(|row| Self::status_from_row(id, row)).transpose()
    }

    async fn recover_stalled(&self, stalled_before_ms: u64, now_ms: u64) -> Result<usize, StorageError> {
        let recovered = self
            .client
            .execute(
                "UPDATE webhook_relay_jobs
                 SET status = CASE
                         WHEN cancel_requested THEN 'stopped'
                         WHEN attempts >= max_attempts THEN 'failed'
                         ELSE 'queued'
                     END,
                     last_error = CASE WHEN cancel_requested THEN last_error ELSE $4 END,
                     ready_at = $3,
                     updated_at = $3
                 WHERE queue = $1 AND status = 'started' AND updated_at < $2",
                &[
                    &self.queue,
                    &(stalled_before_ms as i64),
                    &(now_ms as i64),
                    &WORKER_LOST,
                ],
            )
            .await?;
        Ok(recovered as usize)
    }

    async fn purge_terminal(&self, finished_before_ms: u64) -> Result<usize, StorageError> {
        let purged = self
            .client
            .execute(
                "DELETE FROM webhook_relay_jobs
                 WHERE queue = $1
                   AND status IN ('finished', 'failed', 'stopped')
                   AND updated_at < $2",
                &[&self.queue, &(finished_before_ms as i64)],
            )
            .await?;
        Ok(purged as usize)
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl SnapshotStorage for PostgresStorage {
    async fn put_snapshot(&self, record: &PayloadRecord, ttl: Duration) -> Result<(), StorageError> {
        let now = now_ms();
        let value = serde_json::to_value(record)?;

        self.client
            .execute(
                "DELETE FROM webhook_relay_payloads WHERE expires_at <= $1",
                &[&(now as i64)],
            )
            .await?;

        self.client
            .execute(
                "INSERT INTO webhook_relay_payloads (id, record, expires_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE
                 SET record = EXCLUDED.record, expires_at = EXCLUDED.expires_at",
                &[
                    &record.id.0,
                    &value,
                    &(now.saturating_add(duration_ms(ttl)) as i64),
                ],
            )
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self, id: &RecordId) -> Result<Option<PayloadRecord>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT record FROM webhook_relay_payloads WHERE id = $1 AND expires_at > $2",
                &[&id.0, &(now_ms() as i64)],
            )
            .await?;

        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("record")?;
                Ok(Some(serde_json::from_value(value)?))
            }
            None => Ok(None),
        }
    }
}
