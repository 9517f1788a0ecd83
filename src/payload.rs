use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::storage::SnapshotStorage;
use crate::types::{now_ms, DeliveryRequest, PayloadRecord, RecordId};

/// Default lifetime of a payload snapshot.
pub const DEFAULT_PAYLOAD_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Writes a TTL-bounded audit copy of every accepted request.
///
/// Snapshots exist for inspection only; the delivery path never reads them.
#[derive(Clone)]
pub struct PayloadStore {
    backend: Arc<dyn SnapshotStorage>,
    ttl: Duration,
}

impl PayloadStore {
    pub fn new(backend: Arc<dyn SnapshotStorage>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a snapshot of `request` under a fresh id.
    pub async fn snapshot(&self, request: &DeliveryRequest) -> Result<RecordId, StorageError> {
        let id = RecordId::generate();
        let record = PayloadRecord::from_request(id.clone(), request, now_ms());
        self.backend.put_snapshot(&record, self.ttl).await?;
        Ok(id)
    }

    /// Read a snapshot back, `None` once it has expired.
    pub async fn fetch(&self, id: &RecordId) -> Result<Option<PayloadRecord>, StorageError> {
        self.backend.load_snapshot(id).await
    }
}
