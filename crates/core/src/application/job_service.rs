// Job Service - caller-facing use cases (submit, prepare, generate, status)

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::pipeline::{probe_image, CompliancePipeline, PreparedImage};
use crate::domain::{Job, JobId, JobMode, JobStatus, PhotoSpec, PipelineError, SelectionRect};
use crate::error::{AppError, Result};
use crate::port::{ArtifactStore, IdProvider, JobRepository, SpecRegistry, TimeProvider};

/// Default job retention (24 hours)
pub const DEFAULT_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// How often `wait_for_terminal` re-reads the job
const TERMINAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upload acceptance rules applied before any job is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            min_width: 200,
            min_height: 200,
        }
    }
}

pub struct JobService {
    job_repo: Arc<dyn JobRepository>,
    artifact_store: Arc<dyn ArtifactStore>,
    spec_registry: Arc<dyn SpecRegistry>,
    pipeline: Arc<CompliancePipeline>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    limits: UploadLimits,
    retention_ms: i64,
    dispatcher: Option<mpsc::Sender<JobId>>,
}

impl JobService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        artifact_store: Arc<dyn ArtifactStore>,
        spec_registry: Arc<dyn SpecRegistry>,
        pipeline: Arc<CompliancePipeline>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            artifact_store,
            spec_registry,
            pipeline,
            id_provider,
            time_provider,
            limits: UploadLimits::default(),
            retention_ms: DEFAULT_RETENTION_MS,
            dispatcher: None,
        }
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retention_ms(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }

    /// Hand new job ids to workers over `sender`
    pub fn with_dispatcher(mut self, sender: mpsc::Sender<JobId>) -> Self {
        self.dispatcher = Some(sender);
        self
    }

    /// `submit(image_bytes, country_id) -> job_id` (auto mode)
    pub async fn submit(&self, image_bytes: &[u8], country_id: &str) -> Result<JobId> {
        let spec = self.resolve_spec(country_id).await?;
        let format = self.validate_upload(image_bytes)?;
        self.create_job(image_bytes, format, spec, JobMode::Auto).await
    }

    /// `prepare(image_bytes, country_id) -> {intermediate_image, default_selection, head_box}`
    ///
    /// Runs synchronously for the caller; no job is created.
    pub async fn prepare(&self, image_bytes: &[u8], country_id: &str) -> Result<PreparedImage> {
        let spec = self.resolve_spec(country_id).await?;
        self.validate_upload(image_bytes)?;

        let pipeline = Arc::clone(&self.pipeline);
        let input = image_bytes.to_vec();
        let prepared = tokio::task::spawn_blocking(move || pipeline.prepare(&input, &spec))
            .await
            .map_err(|e| AppError::Internal(format!("prepare task failed: {}", e)))??;

        info!(
            country = %country_id,
            method = %prepared.head_box.method,
            "Prepared image for manual selection"
        );
        Ok(prepared)
    }

    /// `generate(intermediate_image, selection, country_id) -> job_id` (manual mode)
    pub async fn generate(
        &self,
        intermediate: &[u8],
        selection: SelectionRect,
        country_id: &str,
    ) -> Result<JobId> {
        let spec = self.resolve_spec(country_id).await?;
        // Non-finite values cannot be stored, so they never reach a job
        if !selection.is_finite() {
            return Err(PipelineError::SelectionOutOfBounds(format!(
                "selection ({}, {}, {}x{}) has non-finite values",
                selection.x, selection.y, selection.width, selection.height
            ))
            .into());
        }
        let format = self.validate_upload(intermediate)?;
        self.create_job(intermediate, format, spec, JobMode::Manual { selection })
            .await
    }

    /// `get_status(job_id) -> Job`
    ///
    /// Read-only. Expired jobs are reported as not found even before the
    /// sweeper removes them.
    pub async fn get_status(&self, job_id: &JobId) -> Result<Job> {
        let job = self
            .job_repo
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
        if job.is_expired(self.time_provider.now_millis()) {
            return Err(AppError::NotFound(format!("job {} has expired", job_id)));
        }
        Ok(job)
    }

    /// Poll until the job is completed or failed, giving up after `limit`
    pub async fn wait_for_terminal(&self, job_id: &JobId, limit: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let job = self.get_status(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::InvalidState(format!(
                    "job {} still {} after {:?}",
                    job_id, job.status, limit
                )));
            }
            tokio::time::sleep(TERMINAL_POLL_INTERVAL).await;
        }
    }

    /// Bytes of a completed job's output JPEG
    pub async fn get_output(&self, job_id: &JobId) -> Result<Vec<u8>> {
        let job = self.get_status(job_id).await?;
        match (&job.status, &job.result) {
            (JobStatus::Completed, Some(artifact)) => {
                self.artifact_store.get(&artifact.location).await
            }
            _ => Err(AppError::InvalidState(format!(
                "job {} is {}, no output available",
                job_id, job.status
            ))),
        }
    }

    pub async fn list_countries(&self) -> Result<Vec<PhotoSpec>> {
        self.spec_registry.list().await
    }

    async fn resolve_spec(&self, country_id: &str) -> Result<PhotoSpec> {
        self.spec_registry
            .lookup(country_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownCountry(country_id.to_string()).into())
    }

    fn validate_upload(&self, bytes: &[u8]) -> Result<ImageFormat> {
        if bytes.is_empty() {
            return Err(AppError::Validation("upload is empty".to_string()));
        }
        if bytes.len() as u64 > self.limits.max_bytes {
            return Err(AppError::Validation(format!(
                "upload of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                self.limits.max_bytes
            )));
        }
        let (format, size) = probe_image(bytes)?;
        if size.width < self.limits.min_width || size.height < self.limits.min_height {
            return Err(AppError::Validation(format!(
                "image is {}, minimum is {}x{}",
                size, self.limits.min_width, self.limits.min_height
            )));
        }
        Ok(format)
    }

    async fn create_job(
        &self,
        bytes: &[u8],
        format: ImageFormat,
        spec: PhotoSpec,
        mode: JobMode,
    ) -> Result<JobId> {
        let job_id = self.id_provider.generate_id();
        let created_at = self.time_provider.now_millis();

        let ext = format.extensions_str().first().copied().unwrap_or("bin");
        let input = self
            .artifact_store
            .put(&format!("inputs/{}.{}", job_id, ext), bytes)
            .await?;

        let job = Job::new(
            job_id.clone(),
            created_at,
            self.retention_ms,
            spec,
            mode,
            input,
        );
        if let Err(e) = self.job_repo.insert(&job).await {
            if let Err(cleanup) = self.artifact_store.delete(&job.input).await {
                warn!(job_id = %job_id, error = %cleanup, "Failed to remove orphaned input");
            }
            return Err(e);
        }
        info!(job_id = %job_id, country = %job.country_id, "Job submitted");

        self.dispatch(&job_id);
        Ok(job_id)
    }

    fn dispatch(&self, job_id: &JobId) {
        let Some(sender) = &self.dispatcher else {
            return;
        };
        if let Err(e) = sender.try_send(job_id.clone()) {
            // Workers also poll the store, so the job is not lost
            debug!(job_id = %job_id, error = %e, "Dispatch channel unavailable");
        }
    }
}
