use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::RelayConfig;
use crate::error::{DeliveryFailure, DeliveryOutcome, WorkerError};
use crate::queue::DeliveryQueue;
use crate::retry::{self, Transition};
use crate::storage::Storage;
use crate::types::{duration_ms, now_ms, Job, JobStatus};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Performs single delivery attempts. Never retries on its own.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Client whose requests give up after `timeout`.
    ///
    /// Redirects are not followed; a 3xx answer is a failed attempt.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// POST the job's payload to its destination.
    ///
    /// Only HTTP 200 counts as delivered.
    pub async fn execute(&self, job: &Job) -> DeliveryOutcome {
        let mut request = self
            .client
            .post(job.request.destination_url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .json(&job.request.payload);

        if let Some(auth) = job.request.effective_auth_header() {
            request = request.header(AUTHORIZATION, auth);
        }

        match request.send().await {
            Ok(response) if response.status() == StatusCode::OK => DeliveryOutcome::Delivered,
            Ok(response) => DeliveryOutcome::Failed(DeliveryFailure::UnexpectedStatus(
                response.status().as_u16(),
            )),
            Err(err) => DeliveryOutcome::Failed(classify(&err)),
        }
    }
}

fn classify(err: &reqwest::Error) -> DeliveryFailure {
    if err.is_timeout() {
        DeliveryFailure::Timeout
    } else if err.is_connect() {
        DeliveryFailure::Connect(err.to_string())
    } else {
        DeliveryFailure::Transport(err.to_string())
    }
}

/// State shared by every task of a pool.
struct WorkerContext {
    queue_name: String,
    storage: Arc<dyn Storage>,
    client: DeliveryClient,

    /// Wakes idle workers when a job is enqueued locally.
    job_notify: Arc<Notify>,

    shutdown: Arc<Notify>,
    is_running: Arc<AtomicBool>,
    poll_interval: Duration,
}

/// A set of workers draining one queue, plus a maintenance task.
///
/// Several pools, in one process or many, may share a backing store; the
/// store guarantees each attempt is claimed by exactly one worker.
pub struct WorkerPool {
    is_running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    worker_handles: Vec<JoinHandle<()>>,
    maintenance_handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `config.worker_count` workers. Must run inside a tokio runtime.
    pub fn spawn(queue: &DeliveryQueue, config: &RelayConfig) -> Result<Self, WorkerError> {
        config.validate()?;
        let client = DeliveryClient::new(config.delivery_timeout)?;
        Ok(Self::spawn_with_client(queue, config, client))
    }

    pub fn spawn_with_client(queue: &DeliveryQueue, config: &RelayConfig, client: DeliveryClient) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let ctx = Arc::new(WorkerContext {
            queue_name: queue.name().to_string(),
            storage: queue.storage().clone(),
            client,
            job_notify: queue.notifier().clone(),
            shutdown: shutdown.clone(),
            is_running: is_running.clone(),
            poll_interval: config.poll_interval,
        });

        let worker_handles = (0..config.worker_count.max(1))
            .map(|worker| tokio::spawn(worker_loop(worker, ctx.clone())))
            .collect();

        let maintenance_handle = tokio::spawn(maintenance_loop(
            ctx,
            config.stalled_after,
            config.job_retention,
            config.maintenance_interval,
        ));

        tracing::info!(
            queue = %queue.name(),
            workers = config.worker_count.max(1),
            "worker pool started"
        );

        Self {
            is_running,
            shutdown,
            worker_handles,
            maintenance_handle: Some(maintenance_handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Stop claiming jobs and wait for in-flight attempts to finish.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        if let Some(handle) = self.maintenance_handle.take() {
            let _ = handle.await;
        }
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("worker pool stopped");
    }
}

/// Main worker loop.
///
/// Each worker:
/// - Claims the next due job from the store
/// - Runs exactly one delivery attempt
/// - Records the retry scheduler's verdict
/// - Sleeps when nothing is due
async fn worker_loop(worker: usize, ctx: Arc<WorkerContext>) {
    while ctx.is_running.load(Ordering::SeqCst) {
        match ctx.storage.claim_next(now_ms()).await {
            Ok(Some(job)) => process_job(job, &ctx).await,
            Ok(None) => idle(&ctx, ctx.poll_interval).await,
            Err(err) => {
                tracing::error!(queue = %ctx.queue_name, worker, error = %err, "failed to claim job");
                idle(&ctx, ctx.poll_interval).await;
            }
        }
    }
    tracing::debug!(queue = %ctx.queue_name, worker, "worker stopped");
}

async fn idle(ctx: &WorkerContext, period: Duration) {
    tokio::select! {
        _ = ctx.job_notify.notified() => {}
        _ = ctx.shutdown.notified() => {}
        _ = sleep(period) => {}
    }
}

/// Run one attempt and record its result.
async fn process_job(job: Job, ctx: &WorkerContext) {
    tracing::debug!(
        queue = %ctx.queue_name,
        job_id = %job.id,
        attempt = job.attempt_count,
        max_attempts = job.max_attempts,
        "delivery attempt started"
    );

    let outcome = ctx.client.execute(&job).await;
    match outcome {
        DeliveryOutcome::Delivered => metric_inc("webhook.delivery.success"),
        DeliveryOutcome::Failed(_) => metric_inc("webhook.delivery.failure"),
    }

    let transition = retry::decide(&job, &outcome, now_ms());

    match ctx.storage.finish_attempt(&job.id, job.attempt_count, &transition).await {
        Ok(Some(status)) => report(ctx, &job, status, &transition),
        Ok(None) => tracing::warn!(
            queue = %ctx.queue_name,
            job_id = %job.id,
            attempt = job.attempt_count,
            "attempt result discarded, job no longer owned by this attempt"
        ),
        // The job stays `started` and is picked up by stalled-job recovery.
        Err(err) => tracing::error!(
            queue = %ctx.queue_name,
            job_id = %job.id,
            attempt = job.attempt_count,
            error = %err,
            "failed to record attempt result"
        ),
    }
}

fn report(ctx: &WorkerContext, job: &Job, status: JobStatus, transition: &Transition) {
    let error = transition.last_error.as_deref().unwrap_or("");

    match status {
        JobStatus::Finished => tracing::info!(
            queue = %ctx.queue_name,
            job_id = %job.id,
            attempt = job.attempt_count,
            "webhook delivered"
        ),
        JobStatus::Deferred => {
            metric_inc("webhook.delivery.retry_scheduled");
            tracing::warn!(
                queue = %ctx.queue_name,
                job_id = %job.id,
                attempt = job.attempt_count,
                max_attempts = job.max_attempts,
                retry_in_ms = transition.ready_at_ms.saturating_sub(transition.at_ms),
                error,
                "delivery attempt failed, retry scheduled"
            );
        }
        JobStatus::Failed => {
            metric_inc("webhook.delivery.failed");
            tracing::error!(
                queue = %ctx.queue_name,
                job_id = %job.id,
                attempts = job.attempt_count,
                error,
                "webhook delivery failed, attempts exhausted"
            );
        }
        JobStatus::Stopped => tracing::info!(
            queue = %ctx.queue_name,
            job_id = %job.id,
            attempt = job.attempt_count,
            "job stopped after cancellation"
        ),
        other => tracing::debug!(queue = %ctx.queue_name, job_id = %job.id, status = %other, "attempt recorded"),
    }
}

/// Periodically requeue abandoned attempts and drop expired terminal jobs.
async fn maintenance_loop(
    ctx: Arc<WorkerContext>,
    stalled_after: Duration,
    retention: Duration,
    interval: Duration,
) {
    while ctx.is_running.load(Ordering::SeqCst) {
        let now = now_ms();

        match ctx
            .storage
            .recover_stalled(now.saturating_sub(duration_ms(stalled_after)), now)
            .await
        {
            Ok(0) => {}
            Ok(recovered) => {
                metric_inc("webhook.jobs.recovered");
                tracing::warn!(queue = %ctx.queue_name, recovered, "recovered stalled jobs");
                ctx.job_notify.notify_waiters();
            }
            Err(err) => {
                tracing::error!(queue = %ctx.queue_name, error = %err, "stalled job recovery failed")
            }
        }

        match ctx
            .storage
            .purge_terminal(now.saturating_sub(duration_ms(retention)))
            .await
        {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(queue = %ctx.queue_name, purged, "purged terminal jobs"),
            Err(err) => {
                tracing::error!(queue = %ctx.queue_name, error = %err, "terminal job purge failed")
            }
        }

        tokio::select! {
            _ = ctx.shutdown.notified() => {}
            _ = sleep(interval) => {}
        }
    }
}
