//! Shared wiring: real SQLite (in memory or on disk), mock vision backends

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

use photospec_core::application::{
    ComplianceEnforcer, CompliancePipeline, EncoderConfig, HeadLocator, JobService,
    LocatorConfig, UploadLimits, Worker,
};
use photospec_core::domain::Detection;
use photospec_core::port::artifact_store::mocks::InMemoryArtifactStore;
use photospec_core::port::id_provider::mocks::SequentialIdProvider;
use photospec_core::port::time_provider::mocks::FixedTimeProvider;
use photospec_core::port::vision::mocks::{MockBackgroundRemover, StaticDetector};
use photospec_core::port::{ArtifactStore, JobRepository};
use photospec_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository, SqliteSpecRegistry};

pub const START_MS: i64 = 1_700_000_000_000;
pub const RETENTION_MS: i64 = 60 * 60 * 1000;

/// 1200x1600 portrait, enough room around a centered head for every seeded country
pub const PHOTO_W: u32 = 1200;
pub const PHOTO_H: u32 = 1600;

/// Single clear frontal face: expands to a 420px head at (390, 440)
pub fn centered_face() -> Detection {
    Detection::new(450.0, 500.0, 300.0, 300.0, 0.9)
}

pub fn photo(format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(PHOTO_W, PHOTO_H, |x, y| {
        Rgb([(x / 5 % 256) as u8, (y / 7 % 256) as u8, ((x + y) / 11 % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub struct Vision {
    pub remover: Arc<MockBackgroundRemover>,
    pub primary: Arc<StaticDetector>,
    pub cascade: Arc<StaticDetector>,
    pub person: Arc<StaticDetector>,
}

impl Vision {
    pub fn single_face() -> Self {
        Self::new(
            MockBackgroundRemover::pass_through(),
            vec![centered_face()],
            vec![],
            vec![],
        )
    }

    pub fn new(
        remover: MockBackgroundRemover,
        primary: Vec<Detection>,
        cascade: Vec<Detection>,
        person: Vec<Detection>,
    ) -> Self {
        Self {
            remover: Arc::new(remover),
            primary: Arc::new(StaticDetector::new(primary)),
            cascade: Arc::new(StaticDetector::new(cascade)),
            person: Arc::new(StaticDetector::new(person)),
        }
    }

    pub fn pipeline(&self) -> CompliancePipeline {
        let locator = HeadLocator::from_detectors(
            self.primary.clone(),
            self.cascade.clone(),
            self.person.clone(),
            &LocatorConfig::default(),
        );
        CompliancePipeline::new(
            self.remover.clone(),
            locator,
            ComplianceEnforcer::new(EncoderConfig::default()),
        )
    }
}

pub struct Harness {
    pub service: JobService,
    pub repo: Arc<SqliteJobRepository>,
    pub registry: Arc<SqliteSpecRegistry>,
    pub store: Arc<dyn ArtifactStore>,
    pub time: Arc<FixedTimeProvider>,
    pub pipeline: Arc<CompliancePipeline>,
    pub vision: Vision,
}

impl Harness {
    pub async fn in_memory(vision: Vision) -> Self {
        Self::build("sqlite::memory:", Arc::new(InMemoryArtifactStore::new()), vision).await
    }

    pub async fn build(database_url: &str, store: Arc<dyn ArtifactStore>, vision: Vision) -> Self {
        let pool = create_pool(database_url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
        let registry = Arc::new(SqliteSpecRegistry::new(pool));
        let time = Arc::new(FixedTimeProvider::new(START_MS));
        let pipeline = Arc::new(vision.pipeline());

        let service = JobService::new(
            repo.clone(),
            store.clone(),
            registry.clone(),
            pipeline.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            time.clone(),
        )
        .with_limits(UploadLimits {
            max_bytes: 64 * 1024 * 1024,
            ..UploadLimits::default()
        })
        .with_retention_ms(RETENTION_MS);

        Self {
            service,
            repo,
            registry,
            store,
            time,
            pipeline,
            vision,
        }
    }

    pub fn worker(&self, name: &str) -> Worker {
        let repo: Arc<dyn JobRepository> = self.repo.clone();
        Worker::new(
            name,
            repo,
            self.store.clone(),
            self.pipeline.clone(),
            self.time.clone(),
        )
    }
}
