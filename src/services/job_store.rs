use crate::error::{AppResult, PortabilityError};
use crate::models::job::{Job, JobId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable mapping from job id to job record.
///
/// Single-record operations only. Racing `update` calls for one id resolve as
/// last writer wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fails with `Conflict` when the id is already stored.
    async fn create(&self, job: &Job) -> AppResult<()>;

    async fn find(&self, id: &JobId) -> AppResult<Option<Job>>;

    /// Fails with `NotFound` when the id was never created.
    async fn update(&self, job: &Job) -> AppResult<()>;
}

/// Process-local store, used by tests and ephemeral deployments.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> AppResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id()) {
            return Err(PortabilityError::Conflict(format!(
                "Job already exists: {}",
                job.id()
            )));
        }
        jobs.insert(job.id(), job.clone());
        Ok(())
    }

    async fn find(&self, id: &JobId) -> AppResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, job: &Job) -> AppResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id()) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(PortabilityError::NotFound(format!(
                "Job not found: {}",
                job.id()
            ))),
        }
    }
}
