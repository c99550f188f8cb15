// Port Layer - Interfaces for external dependencies

pub mod artifact_store;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod spec_registry;
pub mod time_provider;
pub mod vision;

// Re-exports
pub use artifact_store::ArtifactStore;
pub use id_provider::IdProvider;
pub use job_repository::JobRepository;
pub use spec_registry::SpecRegistry;
pub use time_provider::TimeProvider;
pub use vision::{BackgroundRemover, Detector, VisionError};
