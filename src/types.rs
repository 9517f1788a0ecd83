use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::RetryPolicy;

/// Opaque JSON object delivered to the destination.
///
/// Key order is preserved; the relay never looks inside.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A request to deliver one payload to one destination.
///
/// Authentication of the submitter and schema validation of the inbound
/// document happen before a `DeliveryRequest` exists. The destination URL
/// is still checked by the relay before a job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Where the payload is POSTed.
    pub destination_url: String,

    /// Value forwarded verbatim as the `Authorization` header.
    /// Empty strings are treated as absent.
    pub auth_header: Option<String>,

    /// Free-form label, part of the generated job id.
    pub tag: Option<String>,

    /// Free-form group name, part of the generated job id.
    pub group: Option<String>,

    /// The document to deliver.
    pub payload: Payload,
}

impl DeliveryRequest {
    /// Create a request with no auth header, tag or group.
    pub fn new(destination_url: impl Into<String>, payload: Payload) -> Self {
        Self {
            destination_url: destination_url.into(),
            auth_header: None,
            tag: None,
            group: None,
            payload,
        }
    }

    /// Forward this value as the `Authorization` header.
    pub fn with_auth_header(mut self, auth_header: impl Into<String>) -> Self {
        self.auth_header = Some(auth_header.into());
        self
    }

    /// Label the request.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Assign the request to a group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Auth header to send, if any. Empty values count as none.
    pub fn effective_auth_header(&self) -> Option<&str> {
        self.auth_header.as_deref().filter(|value| !value.is_empty())
    }
}

/// Identifier of a delivery job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Generate `"{group}_{tag}_{uuid}"`, skipping absent or empty parts.
    ///
    /// Collisions between distinct requests are not expected but nothing
    /// cryptographic prevents them.
    pub fn generate(group: Option<&str>, tag: Option<&str>) -> Self {
        let suffix = Uuid::new_v4().to_string();
        let id = [group, tag]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .chain(std::iter::once(suffix.as_str()))
            .collect::<Vec<_>>()
            .join("_");
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a payload snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for its first attempt.
    Queued,
    /// An attempt is in flight.
    Started,
    /// Waiting out the retry interval after a failed attempt.
    Deferred,
    /// Submitted with a start delay that has not elapsed yet.
    Scheduled,
    /// Destination answered 200.
    Finished,
    /// Every attempt failed.
    Failed,
    /// Cancelled.
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Deferred => "deferred",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped)
    }

    /// Statuses a worker may claim from.
    pub fn is_waiting(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Deferred | JobStatus::Scheduled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "deferred" => Ok(JobStatus::Deferred),
            "scheduled" => Ok(JobStatus::Scheduled),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A delivery job as held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: DeliveryRequest,
    pub retry: RetryPolicy,

    /// Total attempts allowed, the first one included. Never zero.
    pub max_attempts: u32,

    /// Attempts started so far.
    pub attempt_count: u32,

    pub status: JobStatus,
    pub enqueued_at_ms: u64,

    /// Earliest time the job may be claimed.
    pub ready_at_ms: u64,

    pub updated_at_ms: u64,

    /// Why the most recent attempt failed.
    pub last_error: Option<String>,

    /// Cancellation arrived while an attempt was in flight.
    pub cancel_requested: bool,
}

impl Job {
    /// Build a job that is claimable at `now_ms + delay`.
    ///
    /// A non-zero delay yields [`JobStatus::Scheduled`], otherwise
    /// [`JobStatus::Queued`].
    pub fn new(
        id: JobId,
        request: DeliveryRequest,
        retry: RetryPolicy,
        now_ms: u64,
        delay: Option<Duration>,
    ) -> Self {
        let delay_ms = delay.map(duration_ms).unwrap_or(0);
        let status = if delay_ms > 0 {
            JobStatus::Scheduled
        } else {
            JobStatus::Queued
        };

        Self {
            id,
            max_attempts: retry.max_attempts.max(1),
            request,
            retry,
            attempt_count: 0,
            status,
            enqueued_at_ms: now_ms,
            ready_at_ms: now_ms.saturating_add(delay_ms),
            updated_at_ms: now_ms,
            last_error: None,
            cancel_requested: false,
        }
    }
}

/// What the caller holds after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub status: JobStatus,
    pub enqueued_at_ms: u64,

    /// Snapshot of the payload, when it could be written.
    pub snapshot: Option<RecordId>,
}

/// Audit copy of an accepted request.
///
/// The auth header is never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub id: RecordId,
    pub destination_url: String,
    pub tag: Option<String>,
    pub group: Option<String>,
    pub payload: Payload,
    pub created_at_ms: u64,
}

impl PayloadRecord {
    pub fn from_request(id: RecordId, request: &DeliveryRequest, now_ms: u64) -> Self {
        Self {
            id,
            destination_url: request.destination_url.clone(),
            tag: request.tag.clone(),
            group: request.group.clone(),
            payload: request.payload.clone(),
            created_at_ms: now_ms,
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
