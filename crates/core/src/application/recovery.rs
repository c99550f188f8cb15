// Crash recovery logic
use crate::domain::{JobError, JobStatus};
use crate::error::AppError;
use crate::port::{JobRepository, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::worker::constants::INTERRUPTED_DETAIL;

/// Crash recovery service
///
/// On daemon startup, fails jobs that were PROCESSING when the previous
/// process died. They are never re-run: a retry is a new job.
pub struct RecoveryService {
    job_repo: Arc<dyn JobRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Example
    /// ```ignore
    /// let recovery = RecoveryService::new(job_repo, time_provider);
    /// recovery.recover_interrupted_jobs().await?;
    /// ```
    pub fn new(job_repo: Arc<dyn JobRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            job_repo,
            time_provider,
        }
    }

    /// Fail every job left in PROCESSING with kind `INTERNAL`
    ///
    /// Must run before workers start, otherwise live jobs would be failed too.
    ///
    /// # Returns
    /// Number of jobs recovered
    pub async fn recover_interrupted_jobs(&self) -> crate::error::Result<usize> {
        let stuck = self.job_repo.find_by_status(JobStatus::Processing).await?;
        info!(count = stuck.len(), "Starting interrupted job recovery");

        let mut recovered = 0;
        for mut job in stuck {
            let now = self.time_provider.now_millis();
            job.fail(JobError::internal(INTERRUPTED_DETAIL), now)?;

            match self.job_repo.record_outcome(&job).await {
                Ok(()) => {
                    info!(job_id = %job.id, "Interrupted job marked as FAILED");
                    recovered += 1;
                }
                Err(e @ (AppError::NotFound(_) | AppError::InvalidState(_))) => {
                    warn!(job_id = %job.id, error = %e, "Job changed during recovery, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        info!(recovered_count = recovered, "Interrupted job recovery complete");
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactRef, ErrorKind, Job, JobMode, PhotoSpec};
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::FixedTimeProvider;

    fn job(id: &str) -> Job {
        Job::new(
            id,
            1_000,
            3_600_000,
            PhotoSpec::new("US", "United States", 600, 600, 0.6),
            JobMode::Auto,
            ArtifactRef::new(format!("inputs/{}.jpg", id)),
        )
    }

    #[tokio::test]
    async fn test_processing_jobs_are_failed_and_others_untouched() {
        let repo = Arc::new(InMemoryJobRepository::new());
        repo.insert(&job("stuck")).await.unwrap();
        repo.insert(&job("waiting")).await.unwrap();
        repo.claim(&"stuck".to_string(), 2_000).await.unwrap();

        let service = RecoveryService::new(repo.clone(), Arc::new(FixedTimeProvider::new(9_000)));
        assert_eq!(service.recover_interrupted_jobs().await.unwrap(), 1);

        let stuck = repo.find_by_id(&"stuck".to_string()).await.unwrap().unwrap();
        assert_eq!(stuck.status, JobStatus::Failed);
        assert_eq!(stuck.updated_at, 9_000);
        let err = stuck.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.detail, INTERRUPTED_DETAIL);

        let waiting = repo.find_by_id(&"waiting".to_string()).await.unwrap().unwrap();
        assert_eq!(waiting.status, JobStatus::Pending);

        // Second pass finds nothing
        assert_eq!(service.recover_interrupted_jobs().await.unwrap(), 0);
    }
}
