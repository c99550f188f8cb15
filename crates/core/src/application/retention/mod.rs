// Retention Sweeper
// Deletes expired jobs and their artifacts on an interval

use crate::domain::Job;
use crate::error::Result;
use crate::port::{ArtifactStore, JobRepository, TimeProvider};
use crate::application::worker::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub deleted_jobs: usize,
    pub deleted_artifacts: usize,
}

/// Retention sweeper
///
/// Jobs past `expires_at` are removed unless a worker is still processing
/// them. Input and output artifacts go with the job.
pub struct RetentionSweeper {
    job_repo: Arc<dyn JobRepository>,
    artifact_store: Arc<dyn ArtifactStore>,
    time_provider: Arc<dyn TimeProvider>,
    interval: Duration,
}

impl RetentionSweeper {
    /// Create a new retention sweeper
    ///
    /// # Arguments
    /// * `interval` - How often to sweep
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        artifact_store: Arc<dyn ArtifactStore>,
        time_provider: Arc<dyn TimeProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            job_repo,
            artifact_store,
            time_provider,
            interval,
        }
    }

    /// Run sweep loop until shutdown (spawn with tokio::spawn)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(interval_secs = self.interval.as_secs(), "Retention sweeper started");

        let mut tick = interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {},
                _ = shutdown.wait() => break,
            }

            match self.sweep_once().await {
                Ok(stats) if stats.deleted_jobs > 0 => {
                    info!(
                        deleted_jobs = stats.deleted_jobs,
                        deleted_artifacts = stats.deleted_artifacts,
                        "Retention sweep completed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = ?e, "Retention sweep failed"),
            }
        }
        info!("Retention sweeper stopped");
    }

    /// Sweep immediately (also used for manual trigger)
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let now = self.time_provider.now_millis();
        let expired = self.job_repo.delete_expired(now).await?;

        let mut stats = SweepStats {
            deleted_jobs: expired.len(),
            deleted_artifacts: 0,
        };
        for job in &expired {
            stats.deleted_artifacts += self.delete_artifacts(job).await;
        }
        Ok(stats)
    }

    async fn delete_artifacts(&self, job: &Job) -> usize {
        let mut deleted = 0;
        let outputs = job.result.iter().map(|r| &r.location);
        for artifact in std::iter::once(&job.input).chain(outputs) {
            match self.artifact_store.delete(artifact).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(job_id = %job.id, artifact = %artifact, error = %e, "Failed to delete artifact")
                }
            }
        }
        deleted
    }
}
