use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::retry::{self, Transition, WORKER_LOST};
use crate::types::{duration_ms, now_ms, Job, JobId, JobStatus, PayloadRecord, RecordId};

/// Backing store of the delivery queue.
///
/// Every method is atomic with respect to concurrent callers, including
/// callers in other processes for the shared backends. In particular
/// `claim_next` hands a waiting job to exactly one caller.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a new job. Fails with [`StorageError::Duplicate`] if the id exists.
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError>;

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>, StorageError>;

    /// Move the waiting job with the earliest `ready_at_ms <= now_ms` to
    /// `started`, bump its attempt count and return it.
    async fn claim_next(&self, now_ms: u64) -> Result<Option<Job>, StorageError>;

    /// Record the result of attempt `attempt`.
    ///
    /// Applies only while the job is still `started` at that attempt.
    /// Returns the stored status, or `None` if the attempt no longer owns
    /// the job.
    async fn finish_attempt(
        &self,
        id: &JobId,
        attempt: u32,
        transition: &Transition,
    ) -> Result<Option<JobStatus>, StorageError>;

    /// Stop a waiting job, or flag a running one. `None` for unknown ids.
    async fn cancel(&self, id: &JobId, now_ms: u64) -> Result<Option<JobStatus>, StorageError>;

    /// Hand back jobs whose attempt started before `stalled_before_ms` and
    /// never finished.
    async fn recover_stalled(&self, stalled_before_ms: u64, now_ms: u64) -> Result<usize, StorageError>;

    /// Drop terminal jobs last updated before `finished_before_ms`.
    async fn purge_terminal(&self, finished_before_ms: u64) -> Result<usize, StorageError>;
}

/// TTL-bounded store of payload snapshots.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    async fn put_snapshot(&self, record: &PayloadRecord, ttl: Duration) -> Result<(), StorageError>;

    /// `None` once the snapshot has expired.
    async fn load_snapshot(&self, id: &RecordId) -> Result<Option<PayloadRecord>, StorageError>;
}

/// In-memory storage for tests and embedded use. Not durable.
#[derive(Default)]
pub struct InMemoryStorage {
    jobs: Mutex<HashMap<JobId, Job>>,
    snapshots: Mutex<HashMap<RecordId, (PayloadRecord, u64)>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(StorageError::Duplicate(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn claim_next(&self, now_ms: u64) -> Result<Option<Job>, StorageError> {
        let mut jobs = self.jobs.lock().await;

        let next = jobs
            .values()
            .filter(|job| job.status.is_waiting() && job.ready_at_ms <= now_ms)
            .min_by(|a, b| (a.ready_at_ms, &a.id).cmp(&(b.ready_at_ms, &b.id)))
            .map(|job| job.id.clone());

        let Some(id) = next else { return Ok(None) };
        let Some(job) = jobs.get_mut(&id) else { return Ok(None) };

        job.status = JobStatus::Started;
        job.attempt_count += 1;
        job.updated_at_ms = now_ms;
        Ok(Some(job.clone()))
    }

    async fn finish_attempt(
        &self,
        id: &JobId,
        attempt: u32,
        transition: &Transition,
    ) -> Result<Option<JobStatus>, StorageError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else { return Ok(None) };
        if job.status != JobStatus::Started || job.attempt_count != attempt {
            return Ok(None);
        }

        let status = retry::apply_cancel(transition.status, job.cancel_requested);
        job.status = status;
        job.updated_at_ms = transition.at_ms;
        job.last_error = transition.last_error.clone();
        if status == JobStatus::Deferred {
            job.ready_at_ms = transition.ready_at_ms;
        }
        Ok(Some(status))
    }

    async fn cancel(&self, id: &JobId, now_ms: u64) -> Result<Option<JobStatus>, StorageError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else { return Ok(None) };

        if job.status == JobStatus::Started {
            job.cancel_requested = true;
        } else if job.status.is_waiting() {
            job.status = JobStatus::Stopped;
            job.updated_at_ms = now_ms;
        }
        Ok(Some(job.status))
    }

    async fn recover_stalled(&self, stalled_before_ms: u64, now_ms: u64) -> Result<usize, StorageError> {
        let mut jobs = self.jobs.lock().await;
        let mut recovered = 0;

        for job in jobs.values_mut() {
            if job.status != JobStatus::Started || job.updated_at_ms >= stalled_before_ms {
                continue;
            }
            job.status = retry::recovered_status(job);
            job.ready_at_ms = now_ms;
            job.updated_at_ms = now_ms;
            if job.status != JobStatus::Stopped {
                job.last_error = Some(WORKER_LOST.to_string());
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn purge_terminal(&self, finished_before_ms: u64) -> Result<usize, StorageError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at_ms < finished_before_ms));
        Ok(before - jobs.len())
    }
}

#[async_trait]
impl SnapshotStorage for InMemoryStorage {
    async fn put_snapshot(&self, record: &PayloadRecord, ttl: Duration) -> Result<(), StorageError> {
        let now = now_ms();
        let mut snapshots = self.snapshots.lock().await;
        snapshots.retain(|_, (_, expires_at)| *expires_at > now);
        snapshots.insert(
            record.id.clone(),
            (record.clone(), now.saturating_add(duration_ms(ttl))),
        );
        Ok(())
    }

    async fn load_snapshot(&self, id: &RecordId) -> Result<Option<PayloadRecord>, StorageError> {
        let now = now_ms();
        let snapshots = self.snapshots.lock().await;
        Ok(snapshots
            .get(id)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(record, _)| record.clone()))
    }
}
