//! Delivery worker process.
//!
//! Drains one Redis-backed queue until Ctrl-C. Submissions come from
//! whatever front end shares the same Redis and queue name.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use webhook_relay::{RedisStorage, Relay, RelayConfig};

/// Process settings.
///
/// Built-in defaults, overridden by `RELAY_`-prefixed environment
/// variables (`RELAY_REDIS_URL`, `RELAY_WORKERS`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    redis_url: String,
    queue_name: String,
    http_timeout_secs: u64,

    /// Must exceed `http_timeout_secs`.
    stalled_after_secs: u64,

    payload_ttl_secs: u64,
    max_retries: u32,
    retry_interval_secs: u64,
    workers: usize,
    log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = RelayConfig::default();
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_name: defaults.queue_name,
            http_timeout_secs: defaults.delivery_timeout.as_secs(),
            stalled_after_secs: defaults.stalled_after.as_secs(),
            payload_ttl_secs: defaults.payload_ttl.as_secs(),
            max_retries: defaults.max_retries,
            retry_interval_secs: defaults.retry_interval.as_secs(),
            workers: defaults.worker_count,
            log_json: false,
        }
    }
}

impl Settings {
    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("RELAY_"))
    }

    fn load() -> Result<Self> {
        Self::figment().extract().context("failed to load settings")
    }

    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            queue_name: self.queue_name.clone(),
            delivery_timeout: Duration::from_secs(self.http_timeout_secs),
            stalled_after: Duration::from_secs(self.stalled_after_secs),
            payload_ttl: Duration::from_secs(self.payload_ttl_secs),
            max_retries: self.max_retries,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            worker_count: self.workers,
            ..RelayConfig::default()
        }
    }

    /// Connection URL without credentials, for logging.
    fn redis_url_masked(&self) -> String {
        match url::Url::parse(&self.redis_url) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            _ => self.redis_url.clone(),
        }
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_tracing(settings.log_json);

    let config = settings.relay_config();
    config.validate().context("invalid relay configuration")?;

    tracing::info!(
        redis_url = %settings.redis_url_masked(),
        queue = %config.queue_name,
        workers = config.worker_count,
        max_retries = config.max_retries,
        "starting relay worker"
    );

    let storage = Arc::new(
        RedisStorage::connect(&settings.redis_url, &config.queue_name)
            .await
            .context("failed to connect to redis")?,
    );
    let relay = Relay::new(config, storage.clone(), storage);
    let mut pool = relay.spawn_workers().context("failed to start workers")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, waiting for in-flight attempts");

    pool.shutdown().await;
    tracing::info!("relay worker stopped");
    Ok(())
}
