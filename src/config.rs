use std::time::Duration;

use crate::error::ConfigError;
use crate::payload::DEFAULT_PAYLOAD_TTL;
use crate::retry::RetryPolicy;

/// Runtime settings of a relay, already parsed.
///
/// Loading these from files or the environment is up to the embedding
/// process; the library never reads either.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Queue identity. Backends use it to namespace their keys.
    pub queue_name: String,

    /// Upper bound of a single delivery attempt.
    pub delivery_timeout: Duration,

    /// Lifetime of payload snapshots.
    pub payload_ttl: Duration,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay between attempts.
    pub retry_interval: Duration,

    pub worker_count: usize,

    /// How long an idle worker sleeps before polling the store again.
    pub poll_interval: Duration,

    /// A `started` job untouched for this long is assumed abandoned.
    pub stalled_after: Duration,

    /// How long terminal jobs stay queryable.
    pub job_retention: Duration,

    /// Period of stalled-job recovery and terminal-job purging.
    pub maintenance_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            queue_name: "webhooks".to_string(),
            delivery_timeout: Duration::from_secs(30),
            payload_ttl: DEFAULT_PAYLOAD_TTL,
            max_retries: 3,
            retry_interval: Duration::from_secs(60),
            worker_count,
            poll_interval: Duration::from_secs(1),
            stalled_after: Duration::from_secs(5 * 60),
            job_retention: Duration::from_secs(24 * 60 * 60),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Policy applied to jobs submitted without an override.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries.saturating_add(1), self.retry_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.delivery_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.stalled_after <= self.delivery_timeout {
            return Err(ConfigError::StallWindowTooShort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.payload_ttl, Duration::from_secs(604_800));
        assert_eq!(config.delivery_timeout, Duration::from_secs(30));
    }

    #[test]
    fn retries_translate_to_total_attempts() {
        let config = RelayConfig { max_retries: 0, ..RelayConfig::default() };
        assert_eq!(config.retry_policy().max_attempts, 1);

        let config = RelayConfig { max_retries: 3, ..RelayConfig::default() };
        assert_eq!(config.retry_policy().max_attempts, 4);
    }

    #[test]
    fn stall_window_must_exceed_timeout() {
        let config = RelayConfig {
            delivery_timeout: Duration::from_secs(30),
            stalled_after: Duration::from_secs(30),
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::StallWindowTooShort));
    }

    #[test]
    fn rejects_zero_workers_and_empty_name() {
        let config = RelayConfig { worker_count: 0, ..RelayConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::NoWorkers));

        let config = RelayConfig { queue_name: " ".into(), ..RelayConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueueName));
    }
}
