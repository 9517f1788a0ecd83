use std::sync::Arc;

use crate::error::StatusError;
use crate::storage::Storage;
use crate::types::{Job, JobId, JobStatus};

/// Read-only view of job lifecycle state.
///
/// Nothing is cached: every call reads the backing store, so the answer is
/// always the latest recorded transition.
#[derive(Clone)]
pub struct StatusTracker {
    storage: Arc<dyn Storage>,
}

impl StatusTracker {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn status(&self, id: &JobId) -> Result<JobStatus, StatusError> {
        self.job(id).await.map(|job| job.status)
    }

    pub async fn job(&self, id: &JobId) -> Result<Job, StatusError> {
        self.storage
            .load_job(id)
            .await?
            .ok_or_else(|| StatusError::NotFound(id.clone()))
    }
}
