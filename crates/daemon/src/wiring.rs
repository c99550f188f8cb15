//! Dependency wiring (composition root)

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use photospec_core::application::{
    ComplianceEnforcer, CompliancePipeline, HeadLocator, JobService, RecoveryService,
    RetentionSweeper, Worker,
};
use photospec_core::domain::JobId;
use photospec_core::port::id_provider::UuidProvider;
use photospec_core::port::time_provider::SystemTimeProvider;
use photospec_core::port::{
    ArtifactStore, BackgroundRemover, Detector, IdProvider, JobRepository, SpecRegistry,
    TimeProvider,
};
use photospec_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository, SqliteSpecRegistry};
use photospec_infra_system::{
    FsArtifactStore, NoopDetector, PassThroughRemover, SubprocessBackgroundRemover,
    SubprocessCommand, SubprocessDetector,
};

use crate::config::{Settings, VisionSettings};

/// Everything the subcommands share
pub struct Components {
    pub settings: Settings,
    pub job_repo: Arc<dyn JobRepository>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub spec_registry: Arc<dyn SpecRegistry>,
    pub pipeline: Arc<CompliancePipeline>,
    pub id_provider: Arc<dyn IdProvider>,
    pub time_provider: Arc<dyn TimeProvider>,
}

impl Components {
    pub async fn build(settings: Settings) -> Result<Self> {
        if let Some(parent) = settings.database_file().as_deref().and_then(|p| p.parent()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        let database_url = settings.database_url();
        info!(database_url = %database_url, "Initializing database...");
        let pool = create_pool(&database_url)
            .await
            .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
        run_migrations(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

        let store = FsArtifactStore::new(settings.artifact_dir());
        store
            .init()
            .await
            .map_err(|e| anyhow::anyhow!("Artifact store init failed: {}", e))?;

        let pipeline = build_pipeline(&settings)?;

        Ok(Self {
            job_repo: Arc::new(SqliteJobRepository::new(pool.clone())),
            artifact_store: Arc::new(store),
            spec_registry: Arc::new(SqliteSpecRegistry::new(pool)),
            pipeline: Arc::new(pipeline),
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
            settings,
        })
    }

    pub fn job_service(&self, dispatcher: Option<mpsc::Sender<JobId>>) -> JobService {
        let service = JobService::new(
            self.job_repo.clone(),
            self.artifact_store.clone(),
            self.spec_registry.clone(),
            self.pipeline.clone(),
            self.id_provider.clone(),
            self.time_provider.clone(),
        )
        .with_limits(self.settings.upload.clone())
        .with_retention_ms(self.settings.retention_ms());
        match dispatcher {
            Some(tx) => service.with_dispatcher(tx),
            None => service,
        }
    }

    pub fn worker(&self, name: impl Into<String>) -> Worker {
        Worker::new(
            name,
            self.job_repo.clone(),
            self.artifact_store.clone(),
            self.pipeline.clone(),
            self.time_provider.clone(),
        )
    }

    pub fn recovery(&self) -> RecoveryService {
        RecoveryService::new(self.job_repo.clone(), self.time_provider.clone())
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            self.job_repo.clone(),
            self.artifact_store.clone(),
            self.time_provider.clone(),
            self.settings.sweep_interval(),
        )
    }
}

fn command(argv: &[String], vision: &VisionSettings) -> Option<SubprocessCommand> {
    SubprocessCommand::from_argv(argv).map(|cmd| {
        cmd.with_timeout(Duration::from_secs(vision.timeout_secs))
            .with_env_allowlist(vision.env_allowlist.clone())
    })
}

fn detector(argv: &[String], vision: &VisionSettings, stage: &str) -> Arc<dyn Detector> {
    match command(argv, vision) {
        Some(cmd) => {
            info!(stage, program = %cmd.program(), "Detector configured");
            Arc::new(SubprocessDetector::new(cmd))
        }
        None => {
            warn!(stage, "No detector configured; stage always falls through");
            Arc::new(NoopDetector)
        }
    }
}

#[cfg(feature = "seetaface")]
fn cascade_detector(vision: &VisionSettings) -> Result<Arc<dyn Detector>> {
    use photospec_infra_system::SeetaFaceDetector;

    if let Some(model) = &vision.seetaface_model {
        let path = crate::config::expand_path(model);
        let detector = SeetaFaceDetector::from_model_file(&path)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        info!(stage = "cascade", model = %path.display(), "SeetaFace detector configured");
        return Ok(Arc::new(detector));
    }
    Ok(detector(&vision.cascade_command, vision, "cascade"))
}

#[cfg(not(feature = "seetaface"))]
fn cascade_detector(vision: &VisionSettings) -> Result<Arc<dyn Detector>> {
    if vision.seetaface_model.is_some() {
        warn!("vision.seetaface_model is set but the seetaface feature is not enabled");
    }
    Ok(detector(&vision.cascade_command, vision, "cascade"))
}

pub fn build_pipeline(settings: &Settings) -> Result<CompliancePipeline> {
    let vision = &settings.vision;
    let remover: Arc<dyn BackgroundRemover> = match command(&vision.background_command, vision) {
        Some(cmd) => {
            info!(program = %cmd.program(), "Background remover configured");
            Arc::new(SubprocessBackgroundRemover::new(cmd))
        }
        None => {
            warn!("No background remover configured; input backgrounds are kept");
            Arc::new(PassThroughRemover)
        }
    };

    let locator = HeadLocator::from_detectors(
        detector(&vision.face_command, vision, "primary"),
        cascade_detector(vision)?,
        detector(&vision.person_command, vision, "person"),
        &settings.locator,
    );

    Ok(CompliancePipeline::new(
        remover,
        locator,
        ComplianceEnforcer::new(settings.encoder.clone()),
    ))
}
