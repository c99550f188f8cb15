// Application Layer - Use Cases and Business Logic

pub mod job_service;
pub mod pipeline;
pub mod recovery;
pub mod retention;
pub mod worker;

// Re-exports
pub use job_service::{JobService, UploadLimits, DEFAULT_RETENTION_MS};
pub use pipeline::{
    CompliancePipeline, ComplianceEnforcer, EncoderConfig, HeadLocator, LocatorConfig,
    PreparedImage, RenderedPhoto,
};
pub use recovery::RecoveryService;
pub use retention::{RetentionSweeper, SweepStats};
pub use worker::{dispatch_channel, shutdown_channel, ShutdownSender, ShutdownToken, Worker};
