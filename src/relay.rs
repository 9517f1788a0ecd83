use std::sync::Arc;
use std::time::Duration;

use crate::config::RelayConfig;
use crate::destination;
use crate::error::{StatusError, StorageError, SubmitError, WorkerError};
use crate::payload::PayloadStore;
use crate::queue::{DeliveryQueue, EnqueueOptions};
use crate::retry::RetryPolicy;
use crate::status::StatusTracker;
use crate::storage::{InMemoryStorage, SnapshotStorage, Storage};
use crate::types::{DeliveryRequest, Job, JobHandle, JobId, JobStatus, PayloadRecord, RecordId};
use crate::worker::WorkerPool;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Per-submission overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Caller-chosen job id. Rejected if it already exists.
    pub job_id: Option<JobId>,

    /// Retry policy for this job instead of the configured one.
    pub retry: Option<RetryPolicy>,

    /// Hold the job as `scheduled` for this long before the first attempt.
    pub delay: Option<Duration>,
}

/// Entry point for submitting deliveries and polling their status.
///
/// Built once at startup around explicitly constructed storage and shared
/// by reference (or clone) with whatever front end accepts requests.
#[derive(Clone)]
pub struct Relay {
    config: RelayConfig,
    queue: DeliveryQueue,
    payloads: PayloadStore,
    tracker: StatusTracker,
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        storage: Arc<dyn Storage>,
        snapshots: Arc<dyn SnapshotStorage>,
    ) -> Self {
        let queue = DeliveryQueue::new(config.queue_name.clone(), storage.clone());
        let payloads = PayloadStore::new(snapshots, config.payload_ttl);
        let tracker = StatusTracker::new(storage);

        Self {
            config,
            queue,
            payloads,
            tracker,
        }
    }

    /// Relay over a fresh [`InMemoryStorage`]. Jobs do not survive the process.
    pub fn in_memory(config: RelayConfig) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        Self::new(config, storage.clone(), storage)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Accept a delivery with the configured retry policy.
    pub async fn submit(&self, request: DeliveryRequest) -> Result<JobHandle, SubmitError> {
        self.submit_with(request, SubmitOptions::default()).await
    }

    /// Accept a delivery.
    ///
    /// Validates the destination, snapshots the payload (best effort) and
    /// enqueues the job. Returns as soon as the job is stored; the outcome
    /// of delivery is only visible through [`Relay::status`].
    pub async fn submit_with(
        &self,
        request: DeliveryRequest,
        options: SubmitOptions,
    ) -> Result<JobHandle, SubmitError> {
        if let Err(err) = destination::validate(&request.destination_url) {
            metric_inc("webhook.submit.rejected");
            tracing::debug!(error = %err, "destination rejected");
            return Err(err.into());
        }

        // Audit snapshots never block delivery.
        let snapshot = match self.payloads.snapshot(&request).await {
            Ok(id) => Some(id),
            Err(err) => {
                metric_inc("webhook.snapshot.failed");
                tracing::warn!(queue = %self.queue.name(), error = %err, "payload snapshot failed");
                None
            }
        };

        let retry = options.retry.unwrap_or_else(|| self.config.retry_policy());
        let enqueue_options = EnqueueOptions {
            job_id: options.job_id,
            delay: options.delay,
        };

        let mut handle = match self.queue.enqueue(request, &retry, enqueue_options).await {
            Ok(handle) => handle,
            Err(err) => {
                metric_inc("webhook.submit.rejected");
                tracing::warn!(queue = %self.queue.name(), error = %err, "enqueue failed");
                return Err(err.into());
            }
        };
        handle.snapshot = snapshot;

        metric_inc("webhook.submit.accepted");
        tracing::info!(
            queue = %self.queue.name(),
            job_id = %handle.id,
            status = %handle.status,
            "webhook accepted"
        );
        Ok(handle)
    }

    pub async fn status(&self, id: &JobId) -> Result<JobStatus, StatusError> {
        self.tracker.status(id).await
    }

    /// Full job state, attempt count and last error included.
    pub async fn job(&self, id: &JobId) -> Result<Job, StatusError> {
        self.tracker.job(id).await
    }

    pub async fn cancel(&self, id: &JobId) -> Result<JobStatus, StatusError> {
        self.queue.cancel(id).await
    }

    /// Payload snapshot taken at submission, until its TTL runs out.
    pub async fn snapshot(&self, id: &RecordId) -> Result<Option<PayloadRecord>, StorageError> {
        self.payloads.fetch(id).await
    }

    /// Start delivery workers for this relay's queue.
    pub fn spawn_workers(&self) -> Result<WorkerPool, WorkerError> {
        WorkerPool::spawn(&self.queue, &self.config)
    }
}
