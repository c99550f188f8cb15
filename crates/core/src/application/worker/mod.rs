// Worker - claims jobs and runs the compliance pipeline to a terminal state

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::pipeline::{CompliancePipeline, RenderedPhoto};
use crate::domain::{Job, JobError, JobId, OutputArtifact, PipelineError};
use crate::error::{AppError, Result};
use crate::port::{ArtifactStore, JobRepository, TimeProvider};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Receiving half of the dispatch channel, shared by all workers
pub type DispatchReceiver = Arc<Mutex<mpsc::Receiver<JobId>>>;

/// Create the submit -> worker dispatch channel
pub fn dispatch_channel() -> (mpsc::Sender<JobId>, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
    (tx, Arc::new(Mutex::new(rx)))
}

/// A single job worker.
///
/// A polling worker picks up jobs inserted by any process from the store; a
/// dispatch-only worker runs the ids handed to it over the dispatch channel.
/// Either way the job is claimed in the store before it runs, so each job
/// runs at most once.
pub struct Worker {
    name: String,
    job_repo: Arc<dyn JobRepository>,
    artifact_store: Arc<dyn ArtifactStore>,
    pipeline: Arc<CompliancePipeline>,
    time_provider: Arc<dyn TimeProvider>,
    dispatch: Option<DispatchReceiver>,
    poll_store: bool,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        job_repo: Arc<dyn JobRepository>,
        artifact_store: Arc<dyn ArtifactStore>,
        pipeline: Arc<CompliancePipeline>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            job_repo,
            artifact_store,
            pipeline,
            time_provider,
            dispatch: None,
            poll_store: true,
        }
    }

    /// Run only dispatched jobs and never poll the store
    pub fn dispatch_only(mut self, receiver: DispatchReceiver) -> Self {
        self.dispatch = Some(receiver);
        self.poll_store = false;
        self
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker = %self.name, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            let polled = if self.poll_store {
                self.process_next_job().await
            } else {
                Ok(false)
            };
            match polled {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        Some(job_id) = self.next_dispatched() => {
                            if let Err(e) = self.process_job(&job_id).await {
                                error!(worker = %self.name, job_id = %job_id, error = %e, "Worker error");
                            }
                        }
                        _ = sleep(IDLE_POLL_INTERVAL) => {},
                        _ = shutdown.wait() => {
                            info!(worker = %self.name, "Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(worker = %self.name, "Worker stopped");
        Ok(())
    }

    async fn next_dispatched(&self) -> Option<JobId> {
        match &self.dispatch {
            Some(rx) => rx.lock().await.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Claim and run the oldest pending job (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();
        match self.job_repo.claim_next(now).await? {
            Some(job) => {
                self.execute(job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Claim and run a specific job. Returns false if it was not pending.
    pub async fn process_job(&self, job_id: &JobId) -> Result<bool> {
        let now = self.time_provider.now_millis();
        match self.job_repo.claim(job_id, now).await? {
            Some(job) => {
                self.execute(job).await?;
                Ok(true)
            }
            None => {
                info!(job_id = %job_id, "Job already claimed or finished, skipping");
                Ok(false)
            }
        }
    }

    /// Run a claimed job to a terminal state and record it
    async fn execute(&self, mut job: Job) -> Result<()> {
        info!(worker = %self.name, job_id = %job.id, country = %job.country_id, "Processing job");

        let outcome = match self.artifact_store.get(&job.input).await {
            Ok(input) => self.run_pipeline(&job, input).await,
            Err(e) => Err(JobError::internal(format!("input artifact unavailable: {}", e))),
        };

        let outcome = match outcome {
            Ok(rendered) => self.store_output(&job, rendered).await,
            Err(e) => Err(e),
        };

        let now = self.time_provider.now_millis();
        match outcome {
            Ok(artifact) => {
                info!(
                    job_id = %job.id,
                    bytes = artifact.byte_size,
                    quality = artifact.quality,
                    "Job completed"
                );
                job.complete(artifact, now)?;
            }
            Err(job_error) => {
                warn!(job_id = %job.id, kind = %job_error.kind, detail = %job_error.detail, "Job failed");
                job.fail(job_error, now)?;
            }
        }

        match self.job_repo.record_outcome(&job).await {
            Ok(()) => Ok(()),
            // Swept or recovered while running: the stored state wins
            Err(e @ (AppError::NotFound(_) | AppError::InvalidState(_))) => {
                warn!(job_id = %job.id, error = %e, "Outcome discarded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the blocking pipeline on the blocking pool; a panic fails the job
    async fn run_pipeline(
        &self,
        job: &Job,
        input: Vec<u8>,
    ) -> std::result::Result<RenderedPhoto, JobError> {
        let pipeline = Arc::clone(&self.pipeline);
        let mode = job.mode.clone();
        let spec = job.spec.clone();

        let handle =
            tokio::task::spawn_blocking(move || pipeline.process(&input, &mode, &spec));

        match handle.await {
            Ok(Ok(rendered)) => Ok(rendered),
            Ok(Err(e)) => Err(JobError::from(e)),
            Err(join_err) => {
                let detail = if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = payload.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    error!(job_id = %job.id, panic_msg = %msg, "Pipeline panicked");
                    format!("pipeline panicked: {}", msg)
                } else {
                    "pipeline task cancelled".to_string()
                };
                Err(JobError::from(PipelineError::Internal(detail)))
            }
        }
    }

    async fn store_output(
        &self,
        job: &Job,
        rendered: RenderedPhoto,
    ) -> std::result::Result<OutputArtifact, JobError> {
        let key = format!("{}/{}.jpg", OUTPUT_KEY_PREFIX, job.id);
        let location = self
            .artifact_store
            .put(&key, &rendered.data)
            .await
            .map_err(|e| JobError::internal(format!("failed to store output: {}", e)))?;
        Ok(OutputArtifact {
            location,
            byte_size: rendered.data.len() as u64,
            width: rendered.width,
            height: rendered.height,
            quality: rendered.quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::test_support::encoded;
    use crate::application::pipeline::{ComplianceEnforcer, HeadLocator, LocatorConfig};
    use crate::domain::{ArtifactRef, Detection, ErrorKind, JobMode, JobStatus, PhotoSpec};
    use crate::port::artifact_store::mocks::InMemoryArtifactStore;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::port::vision::mocks::{MockBackgroundRemover, StaticDetector};
    use crate::port::BackgroundRemover;
    use image::ImageFormat;

    struct Fixture {
        repo: Arc<InMemoryJobRepository>,
        store: Arc<InMemoryArtifactStore>,
        worker: Worker,
    }

    fn us_spec() -> PhotoSpec {
        PhotoSpec::new("US", "United States", 300, 300, 0.6)
    }

    fn fixture(remover: Arc<dyn BackgroundRemover>, faces: Vec<Detection>) -> Fixture {
        let repo = Arc::new(InMemoryJobRepository::new());
        let store = Arc::new(InMemoryArtifactStore::new());
        let locator = HeadLocator::from_detectors(
            Arc::new(StaticDetector::new(faces)),
            Arc::new(StaticDetector::empty()),
            Arc::new(StaticDetector::empty()),
            &LocatorConfig::default(),
        );
        let pipeline = Arc::new(CompliancePipeline::new(
            remover,
            locator,
            ComplianceEnforcer::default(),
        ));
        let worker = Worker::new(
            "test-worker",
            repo.clone(),
            store.clone(),
            pipeline,
            Arc::new(FixedTimeProvider::new(5_000)),
        );
        Fixture {
            repo,
            store,
            worker,
        }
    }

    /// Face whose 1.4x head estimate is 140px tall, centred at (300, 300)
    fn face() -> Detection {
        Detection::new(250.0, 250.0, 100.0, 100.0, 0.9)
    }

    async fn insert_job(f: &Fixture, id: &str, mode: JobMode) -> Job {
        let input = f
            .store
            .put(&format!("inputs/{}.png", id), &encoded(600, 600, ImageFormat::Png))
            .await
            .unwrap();
        let job = Job::new(id, 1_000, 3_600_000, us_spec(), mode, input);
        f.repo.insert(&job).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_successful_job_completes_with_output() {
        let f = fixture(Arc::new(MockBackgroundRemover::pass_through()), vec![face()]);
        insert_job(&f, "job-1", JobMode::Auto).await;

        assert!(f.worker.process_next_job().await.unwrap());

        let job = f.repo.find_by_id(&"job-1".to_string()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.updated_at, 5_000);
        let result = job.result.unwrap();
        assert_eq!((result.width, result.height), (300, 300));
        assert_eq!(result.quality, 95);
        let bytes = f.store.get(&result.location).await.unwrap();
        assert_eq!(bytes.len() as u64, result.byte_size);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_pipeline_error_fails_job_with_kind() {
        let f = fixture(Arc::new(MockBackgroundRemover::pass_through()), vec![]);
        insert_job(&f, "job-1", JobMode::Auto).await;

        f.worker.process_next_job().await.unwrap();

        let job = f.repo.find_by_id(&"job-1".to_string()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::NoHeadFound);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_panic_is_isolated_and_fails_job() {
        let f = fixture(Arc::new(MockBackgroundRemover::panicking("boom")), vec![face()]);
        insert_job(&f, "job-1", JobMode::Auto).await;

        assert!(f.worker.process_next_job().await.unwrap());

        let job = f.repo.find_by_id(&"job-1".to_string()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let err = job.error.unwrap();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(err.detail.contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_input_fails_job_as_internal() {
        let f = fixture(Arc::new(MockBackgroundRemover::pass_through()), vec![face()]);
        let job = Job::new(
            "job-1",
            1_000,
            3_600_000,
            us_spec(),
            JobMode::Auto,
            ArtifactRef::new("inputs/gone.png"),
        );
        f.repo.insert(&job).await.unwrap();

        f.worker.process_next_job().await.unwrap();

        let job = f.repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_terminal_job_is_never_rerun() {
        let remover = Arc::new(MockBackgroundRemover::pass_through());
        let f = fixture(remover.clone(), vec![face()]);
        insert_job(&f, "job-1", JobMode::Auto).await;

        assert!(f.worker.process_job(&"job-1".to_string()).await.unwrap());
        let first = f.repo.find_by_id(&"job-1".to_string()).await.unwrap();

        assert!(!f.worker.process_job(&"job-1".to_string()).await.unwrap());
        assert!(!f.worker.process_next_job().await.unwrap());
        assert_eq!(remover.call_count(), 1);
        assert_eq!(f.repo.find_by_id(&"job-1".to_string()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_manual_job_skips_detection() {
        let remover = Arc::new(MockBackgroundRemover::pass_through());
        let f = fixture(remover.clone(), vec![]);
        insert_job(
            &f,
            "job-1",
            JobMode::Manual {
                selection: crate::domain::SelectionRect::new(100.0, 100.0, 400.0, 400.0),
            },
        )
        .await;

        f.worker.process_next_job().await.unwrap();

        let job = f.repo.find_by_id(&"job-1".to_string()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(remover.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_only_worker_ignores_undispatched_jobs() {
        let f = fixture(Arc::new(MockBackgroundRemover::pass_through()), vec![face()]);
        insert_job_raw(&f.repo, &f.store, "job-other").await;

        let (tx, rx) = dispatch_channel();
        let worker = Arc::new(f.worker.dispatch_only(rx));
        let (sender, token) = shutdown_channel();
        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.run(token).await })
        };

        insert_job_raw(&f.repo, &f.store, "job-mine").await;
        tx.send("job-mine".to_string()).await.unwrap();

        let mut status = JobStatus::Pending;
        for _ in 0..200 {
            status = f
                .repo
                .find_by_id(&"job-mine".to_string())
                .await
                .unwrap()
                .unwrap()
                .status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status, JobStatus::Completed);

        let other = f.repo.find_by_id(&"job-other".to_string()).await.unwrap().unwrap();
        assert_eq!(other.status, JobStatus::Pending);

        sender.shutdown();
        handle.await.unwrap().unwrap();
    }

    async fn insert_job_raw(repo: &InMemoryJobRepository, store: &InMemoryArtifactStore, id: &str) {
        let input = store
            .put(&format!("inputs/{}.png", id), &encoded(600, 600, ImageFormat::Png))
            .await
            .unwrap();
        repo.insert(&Job::new(id, 1_000, 3_600_000, us_spec(), JobMode::Auto, input))
            .await
            .unwrap();
    }
}
