#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::aio::MultiplexedConnection;
#[cfg(feature = "redis")]
use redis::{AsyncCommands, Script};
#[cfg(feature = "redis")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "redis")]
use std::collections::HashMap;
#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use crate::error::StorageError;
#[cfg(feature = "redis")]
use crate::retry::{RetryPolicy, Transition, WORKER_LOST};
#[cfg(feature = "redis")]
use crate::storage::{SnapshotStorage, Storage};
#[cfg(feature = "redis")]
use crate::types::{DeliveryRequest, Job, JobId, JobStatus, PayloadRecord, RecordId};

// Each job is a hash: immutable `definition` JSON plus one field per mutable
// attribute, so scripts never decode JSON. Waiting jobs sit in the `ready`
// set scored by ready time, running ones in `started` scored by claim
// time, terminal ones in `terminal` scored by completion time.

#[cfg(feature = "redis")]
const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1],
  'definition', ARGV[2], 'status', ARGV[3], 'attempts', '0', 'max_attempts', ARGV[4],
  'ready_at', ARGV[5], 'updated_at', ARGV[6], 'cancel', '0')
redis.call('ZADD', KEYS[2], ARGV[5], ARGV[1])
return 1
"#;

#[cfg(feature = "redis")]
const CLAIM_SCRIPT: &str = r#"
while true do
  local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
  if #ids == 0 then
    return false
  end
  local id = ids[1]
  redis.call('ZREM', KEYS[1], id)
  local key = ARGV[2] .. id
  local status = redis.call('HGET', key, 'status')
  if status == 'queued' or status == 'deferred' or status == 'scheduled' then
    redis.call('HSET', key, 'status', 'started', 'updated_at', ARGV[1])
    redis.call('HINCRBY', key, 'attempts', 1)
    redis.call('ZADD', KEYS[2], ARGV[1], id)
    return id
  end
end
"#;

#[cfg(feature = "redis")]
const FINISH_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'status', 'attempts', 'cancel')
if cur[1] ~= 'started' or cur[2] ~= ARGV[2] then
  return false
end
local status = ARGV[3]
if cur[3] == '1' and (status == 'queued' or status == 'deferred' or status == 'scheduled') then
  status = 'stopped'
end
redis.call('HSET', KEYS[1], 'status', status, 'updated_at', ARGV[5])
if ARGV[6] == '' then
  redis.call('HDEL', KEYS[1], 'last_error')
else
  redis.call('HSET', KEYS[1], 'last_error', ARGV[6])
end
redis.call('ZREM', KEYS[3], ARGV[1])
if status == 'deferred' then
  redis.call('HSET', KEYS[1], 'ready_at', ARGV[4])
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
else
  redis.call('ZADD', KEYS[4], ARGV[5], ARGV[1])
end
return status
"#;

#[cfg(feature = "redis")]
const CANCEL_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
  return false
end
if status == 'started' then
  redis.call('HSET', KEYS[1], 'cancel', '1')
  return status
end
if status == 'queued' or status == 'deferred' or status == 'scheduled' then
  redis.call('HSET', KEYS[1], 'status', 'stopped', 'updated_at', ARGV[2])
  redis.call('ZREM', KEYS[2], ARGV[1])
  redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
  return 'stopped'
end
return status
"#;

#[cfg(feature = "redis")]
const RECOVER_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
local recovered = 0
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  local key = ARGV[2] .. id
  local cur = redis.call('HMGET', key, 'status', 'attempts', 'max_attempts', 'cancel')
  if cur[1] == 'started' then
    recovered = recovered + 1
    if cur[4] == '1' then
      redis.call('HSET', key, 'status', 'stopped', 'updated_at', ARGV[3])
      redis.call('ZADD', KEYS[3], ARGV[3], id)
    elseif tonumber(cur[2]) >= tonumber(cur[3]) then
      redis.call('HSET', key, 'status', 'failed', 'updated_at', ARGV[3], 'last_error', ARGV[4])
      redis.call('ZADD', KEYS[3], ARGV[3], id)
    else
      redis.call('HSET', key, 'status', 'queued', 'ready_at', ARGV[3], 'updated_at', ARGV[3], 'last_error', ARGV[4])
      redis.call('ZADD', KEYS[2], ARGV[3], id)
    end
  end
end
return recovered
"#;

#[cfg(feature = "redis")]
const PURGE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
for _, id in ipairs(ids) do
  redis.call('DEL', ARGV[2] .. id)
end
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
return #ids
"#;

/// Fields of a job that never change after enqueue.
#[cfg(feature = "redis")]
#[derive(Serialize, Deserialize)]
struct JobDefinition {
    request: DeliveryRequest,
    retry: RetryPolicy,
    enqueued_at_ms: u64,
}

/// Redis-backed queue and snapshot store.
///
/// All state changes run as Lua scripts, so any number of processes can
/// share one Redis safely.
#[cfg(feature = "redis")]
pub struct RedisStorage {
    conn: MultiplexedConnection,
    prefix: String,
    insert: Script,
    claim: Script,
    finish: Script,
    cancel: Script,
    recover: Script,
    purge: Script,
}

#[cfg(feature = "redis")]
impl RedisStorage {
    /// Connect to `redis_url` and namespace keys under the queue name.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        Self::new(client, format!("webhook_relay:{queue_name}")).await
    }

    pub async fn new(client: redis::Client, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
            insert: Script::new(INSERT_SCRIPT),
            claim: Script::new(CLAIM_SCRIPT),
            finish: Script::new(FINISH_SCRIPT),
            cancel: Script::new(CANCEL_SCRIPT),
            recover: Script::new(RECOVER_SCRIPT),
            purge: Script::new(PURGE_SCRIPT),
        })
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}{}", self.job_prefix(), id.0)
    }

    fn ready_key(&self) -> String {
        format!("{}:ready", self.prefix)
    }

    fn started_key(&self) -> String {
        format!("{}:started", self.prefix)
    }

    fn terminal_key(&self) -> String {
        format!("{}:terminal", self.prefix)
    }

    fn payload_key(&self, id: &RecordId) -> String {
        format!("{}:payload:{}", self.prefix, id.0)
    }

    fn decode_job(id: &JobId, mut fields: HashMap<String, String>) -> Result<Job, StorageError> {
        let corrupt = |message: String| StorageError::Corrupt { id: id.0.clone(), message };

        let definition = fields.remove("definition").ok_or_else(|| corrupt("missing definition".into()))?;
        let definition: JobDefinition = serde_json::from_str(&definition)?;

        let number = |name: &str| -> Result<u64, StorageError> {
            fields
                .get(name)
                .ok_or_else(|| corrupt(format!("missing {name}")))?
                .parse::<u64>()
                .map_err(|err| corrupt(format!("bad {name}: {err}")))
        };
        let attempt_count = number("attempts")? as u32;
        let max_attempts = number("max_attempts")? as u32;
        let ready_at_ms = number("ready_at")?;
        let updated_at_ms = number("updated_at")?;

        let status = fields
            .get("status")
            .ok_or_else(|| corrupt("missing status".into()))?
            .parse::<JobStatus>()
            .map_err(corrupt)?;

        Ok(Job {
            id: id.clone(),
            request: definition.request,
            retry: definition.retry,
            max_attempts,
            attempt_count,
            status,
            enqueued_at_ms: definition.enqueued_at_ms,
            ready_at_ms,
            updated_at_ms,
            last_error: fields.remove("last_error"),
            cancel_requested: fields.get("cancel").map(|v| v == "1").unwrap_or(false),
        })
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl Storage for RedisStorage {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        let definition = serde_json::to_string(&JobDefinition {
            request: job.request.clone(),
            retry: job.retry.clone(),
            enqueued_at_ms: job.enqueued_at_ms,
        })?;

        let mut conn = self.conn.clone();
        let inserted: i64 = self
            .insert
            .key(self.job_key(&job.id))
            .key(self.ready_key())
            .arg(&job.id.0)
            .arg(definition)
            .arg(job.status.as_str())
            .arg(job.max_attempts)
            .arg(job.ready_at_ms)
            .arg(job.updated_at_ms)
            .invoke_async(&mut conn)
            .await?;

        if inserted == 0 {
            return Err(StorageError::Duplicate(job.id.clone()));
        }
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Self::decode_job(id, fields).map(Some)
    }

    async fn claim_next(&self, now_ms: u64) -> Result<Option<Job>, StorageError> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = self
            .claim
            .key(self.ready_key())
            .key(self.started_key())
            .arg(now_ms)
            .arg(self.job_prefix())
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some(id) => self.load_job(&JobId(id)).await,
            None => Ok(None),
        }
    }

    async fn finish_attempt(
        &self,
        id: &JobId,
        attempt: u32,
        transition: &Transition,
    ) -> Result<Option<JobStatus>, StorageError> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = self
            .finish
            .key(self.job_key(id))
            .key(self.ready_key())
            .key(self.started_key())
            .key(self.terminal_key())
            .arg(&id.0)
            .arg(attempt)
            .arg(transition.status.as_str())
            .arg(transition.ready_at_ms)
            .arg(transition.at_ms)
            .arg(transition.last_error.as_deref().unwrap_or(""))
            .invoke_async(&mut conn)
            .await?;

        stored
            .map(|status| {
                status.parse::<JobStatus>().map_err(|message| StorageError::Corrupt {
                    id: id.0.clone(),
                    message,
                })
            })
            .transpose()
    }

    async fn cancel(&self, id: &JobId, now_ms: u64) -> Result<Option<JobStatus>, StorageError> {
        let mut conn = self.conn.clone();
        let status: Option<String> = self
            .cancel
            .key(self.job_key(id))
            .key(self.ready_key())
            .key(self.terminal_key())
            .arg(&id.0)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;

        status
            .map(|status| {
                status.parse::<JobStatus>().map_err(|message| StorageError::Corrupt {
                    id: id.0.clone(),
                    message,
                })
            })
            .transpose()
    }

    async fn recover_stalled(&self, stalled_before_ms: u64, now_ms: u64) -> Result<usize, StorageError> {
        let mut conn = self.conn.clone();
        let recovered: usize = self
            .recover
            .key(self.started_key())
            .key(self.ready_key())
            .key(self.terminal_key())
            .arg(stalled_before_ms)
            .arg(self.job_prefix())
            .arg(now_ms)
            .arg(WORKER_LOST)
            .invoke_async(&mut conn)
            .await?;
        Ok(recovered)
    }

    async fn purge_terminal(&self, finished_before_ms: u64) -> Result<usize, StorageError> {
        let mut conn = self.conn.clone();
        let purged: usize = self
            .purge
            .key(self.terminal_key())
            .arg(finished_before_ms)
            .arg(self.job_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(purged)
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl SnapshotStorage for RedisStorage {
    async fn put_snapshot(&self, record: &PayloadRecord, ttl: Duration) -> Result<(), StorageError> {
        let payload = serde_json::to_string(record)?;
        let seconds = ttl.as_secs().max(1) as usize;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.payload_key(&record.id), payload, seconds)
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self, id: &RecordId) -> Result<Option<PayloadRecord>, StorageError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.payload_key(id)).await?;
        payload
            .map(|payload| serde_json::from_str(&payload).map_err(StorageError::from))
            .transpose()
    }
}
