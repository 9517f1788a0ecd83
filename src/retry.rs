//! Retry scheduling for failed delivery attempts.
//!
//! Everything here is pure: given a job, the outcome of its latest attempt
//! and the current time, decide the next status and when the job becomes
//! claimable again. Storage backends apply the decision atomically.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryOutcome;
use crate::types::{duration_ms, Job, JobStatus};

/// Recorded as `last_error` when a worker vanished mid-attempt.
pub const WORKER_LOST: &str = "worker lost during delivery attempt";

/// How a job is retried after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the initial one included.
    pub max_attempts: u32,

    /// Delay before the next attempt.
    pub interval: Duration,

    /// Cap for growing backoff strategies.
    pub max_interval: Duration,

    pub backoff: BackoffStrategy,

    /// Upper bound of a uniformly random extra delay.
    pub jitter: Duration,
}

/// Growth of the inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// `interval * attempt`.
    Linear,
    /// `interval * 2^(attempt - 1)`.
    Exponential,
}

impl Default for RetryPolicy {
    /// Three retries, one minute apart.
    fn default() -> Self {
        Self::fixed(4, Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// Fixed interval between attempts, no jitter.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            max_interval: interval,
            backoff: BackoffStrategy::Fixed,
            jitter: Duration::ZERO,
        }
    }

    /// Doubling interval, capped at `max_interval`.
    pub fn exponential(max_attempts: u32, interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            max_interval: max_interval.max(interval),
            backoff: BackoffStrategy::Exponential,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after attempt number `attempt` (1-based) failed, without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            BackoffStrategy::Fixed => self.interval,
            BackoffStrategy::Linear => {
                let delay = self.interval.saturating_mul(attempt);
                delay.min(self.max_interval.max(self.interval))
            }
            BackoffStrategy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                let delay = self.interval.saturating_mul(factor);
                delay.min(self.max_interval.max(self.interval))
            }
        }
    }

    /// Delay after attempt `attempt` failed, jitter included.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt) + jitter_delay(self.jitter)
    }
}

fn jitter_delay(jitter: Duration) -> Duration {
    let jitter_ms = duration_ms(jitter);
    if jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(0..=jitter_ms))
}

/// The state a job moves to once an attempt is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: JobStatus,

    /// Only meaningful for [`JobStatus::Deferred`].
    pub ready_at_ms: u64,

    /// When the transition happened.
    pub at_ms: u64,

    pub last_error: Option<String>,
}

/// Decide what happens to `job` after its current attempt produced `outcome`.
///
/// `job.attempt_count` is the number of the attempt that just ran.
pub fn decide(job: &Job, outcome: &DeliveryOutcome, now_ms: u64) -> Transition {
    match outcome {
        DeliveryOutcome::Delivered => Transition {
            status: JobStatus::Finished,
            ready_at_ms: job.ready_at_ms,
            at_ms: now_ms,
            last_error: None,
        },
        DeliveryOutcome::Failed(failure) if job.attempt_count < job.max_attempts => {
            let delay = job.retry.next_delay(job.attempt_count);
            Transition {
                status: JobStatus::Deferred,
                ready_at_ms: now_ms.saturating_add(duration_ms(delay)),
                at_ms: now_ms,
                last_error: Some(failure.to_string()),
            }
        }
        DeliveryOutcome::Failed(failure) => Transition {
            status: JobStatus::Failed,
            ready_at_ms: job.ready_at_ms,
            at_ms: now_ms,
            last_error: Some(failure.to_string()),
        },
    }
}

/// A cancel that arrived mid-attempt turns any non-terminal result into
/// [`JobStatus::Stopped`]. A successful delivery stays finished.
pub fn apply_cancel(status: JobStatus, cancel_requested: bool) -> JobStatus {
    if cancel_requested && !status.is_terminal() {
        JobStatus::Stopped
    } else {
        status
    }
}

/// Status for a job whose worker disappeared while it was `started`.
pub fn recovered_status(job: &Job) -> JobStatus {
    if job.cancel_requested {
        JobStatus::Stopped
    } else if job.attempt_count >= job.max_attempts {
        JobStatus::Failed
    } else {
        JobStatus::Queued
    }
}
