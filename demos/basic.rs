//! Submit one webhook to an in-memory relay and poll it to completion.
//!
//! ```text
//! cargo run --example basic -- https://example.com/webhook
//! ```

use std::time::Duration;

use serde_json::json;
use webhook_relay::{DeliveryRequest, Relay, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .init();

    let destination = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com/webhook".to_string());

    let relay = Relay::in_memory(RelayConfig {
        worker_count: 2,
        max_retries: 2,
        retry_interval: Duration::from_secs(2),
        ..RelayConfig::default()
    });
    let mut workers = relay.spawn_workers()?;

    let payload = json!({ "order_id": 123, "state": "paid" });
    let request = DeliveryRequest::new(destination, payload.as_object().cloned().unwrap_or_default())
        .with_auth_header("Bearer demo-token")
        .with_group("orders")
        .with_tag("paid");

    let handle = relay.submit(request).await?;
    println!("accepted {} ({})", handle.id, handle.status);

    loop {
        let job = relay.job(&handle.id).await?;
        println!("status: {} after {} attempt(s)", job.status, job.attempt_count);
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    workers.shutdown().await;
    Ok(())
}
