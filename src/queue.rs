use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::destination;
use crate::error::{EnqueueError, StatusError};
use crate::retry::RetryPolicy;
use crate::status::StatusTracker;
use crate::storage::Storage;
use crate::types::{now_ms, DeliveryRequest, Job, JobHandle, JobId, JobStatus};

/// Per-job enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Use this id instead of generating one. Duplicates are rejected.
    pub job_id: Option<JobId>,

    /// Keep the job `scheduled` for this long before its first attempt.
    pub delay: Option<Duration>,
}

/// Durable, at-least-once queue of delivery jobs.
///
/// Cloning is cheap; clones share the backing store and wake the same
/// local workers.
#[derive(Clone)]
pub struct DeliveryQueue {
    name: String,
    storage: Arc<dyn Storage>,
    notify: Arc<Notify>,
}

impl DeliveryQueue {
    pub fn new(name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            storage,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate the destination, then durably store a new job.
    ///
    /// Returns once the job is stored; no attempt has run yet.
    pub async fn enqueue(
        &self,
        request: DeliveryRequest,
        retry: &RetryPolicy,
        options: EnqueueOptions,
    ) -> Result<JobHandle, EnqueueError> {
        destination::validate(&request.destination_url)?;

        let id = options.job_id.unwrap_or_else(|| {
            JobId::generate(request.group.as_deref(), request.tag.as_deref())
        });
        let job = Job::new(id, request, retry.clone(), now_ms(), options.delay);

        self.storage.insert_job(&job).await?;
        if job.status == JobStatus::Queued {
            self.notify.notify_one();
        }

        tracing::debug!(
            queue = %self.name,
            job_id = %job.id,
            status = %job.status,
            max_attempts = job.max_attempts,
            "job enqueued"
        );

        Ok(JobHandle {
            id: job.id,
            status: job.status,
            enqueued_at_ms: job.enqueued_at_ms,
            snapshot: None,
        })
    }

    pub async fn status(&self, id: &JobId) -> Result<JobStatus, StatusError> {
        self.tracker().status(id).await
    }

    /// Status view over this queue's store.
    pub fn tracker(&self) -> StatusTracker {
        StatusTracker::new(self.storage.clone())
    }

    /// Mark a job `stopped` before its next dispatch.
    ///
    /// A running attempt is not interrupted; the job stops once it ends,
    /// unless that attempt delivered. Terminal jobs are left as they are.
    pub async fn cancel(&self, id: &JobId) -> Result<JobStatus, StatusError> {
        let status = self
            .storage
            .cancel(id, now_ms())
            .await?
            .ok_or_else(|| StatusError::NotFound(id.clone()))?;

        tracing::info!(queue = %self.name, job_id = %id, status = %status, "job cancel requested");
        Ok(status)
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn notifier(&self) -> &Arc<Notify> {
        &self.notify
    }
}
