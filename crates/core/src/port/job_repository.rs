// Job Repository Port (Interface)

use crate::domain::{Job, JobId, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for Job persistence
///
/// The store is the single source of truth shared by submitters and workers.
/// Claims and outcome writes are conditional on the stored status so two
/// workers can never own the same job.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically move a specific job `PENDING -> PROCESSING`.
    ///
    /// Returns `None` if the job does not exist or is not pending.
    async fn claim(&self, id: &JobId, now_millis: i64) -> Result<Option<Job>>;

    /// Atomically claim the oldest pending job
    async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>>;

    /// Persist the terminal outcome of a job that is still `PROCESSING`.
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job no longer exists
    /// - `AppError::InvalidState` if the stored job is not processing
    async fn record_outcome(&self, job: &Job) -> Result<()>;

    /// Find all jobs by status (for recovery)
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Delete non-processing jobs whose `expires_at <= now`, returning them
    async fn delete_expired(&self, now_millis: i64) -> Result<Vec<Job>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository with the same conditional-write semantics as SQLite
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<HashMap<JobId, Job>>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("job {} already exists", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn claim(&self, id: &JobId, now_millis: i64) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id) {
                Some(job) if job.status == JobStatus::Pending => {
                    job.claim(now_millis)?;
                    Ok(Some(job.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            let next = jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
                .map(|j| j.id.clone());
            match next.and_then(|id| jobs.get_mut(&id)) {
                Some(job) => {
                    job.claim(now_millis)?;
                    Ok(Some(job.clone()))
                }
                None => Ok(None),
            }
        }

        async fn record_outcome(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let stored = jobs
                .get_mut(&job.id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", job.id)))?;
            if stored.status != JobStatus::Processing {
                return Err(AppError::InvalidState(format!(
                    "job {} is {}, not PROCESSING",
                    job.id, stored.status
                )));
            }
            stored.status = job.status;
            stored.result = job.result.clone();
            stored.error = job.error.clone();
            stored.updated_at = job.updated_at;
            Ok(())
        }

        async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
            let mut found: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.status == status)
                .cloned()
                .collect();
            found.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(found)
        }

        async fn delete_expired(&self, now_millis: i64) -> Result<Vec<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            let expired: Vec<JobId> = jobs
                .values()
                .filter(|j| j.status != JobStatus::Processing && j.is_expired(now_millis))
                .map(|j| j.id.clone())
                .collect();
            Ok(expired
                .iter()
                .filter_map(|id| jobs.remove(id))
                .collect())
        }
    }
}
