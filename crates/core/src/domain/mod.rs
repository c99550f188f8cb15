// Domain Layer - Pure business logic and entities

pub mod error;
pub mod geometry;
pub mod job;
pub mod spec;

// Re-exports
pub use error::{DomainError, ErrorKind, JobError, PipelineError};
pub use geometry::{
    CropTransform, Detection, DetectionMethod, HeadBox, ImageSize, Rect, SelectionRect,
};
pub use job::{ArtifactRef, Job, JobId, JobMode, JobStatus, OutputArtifact};
pub use spec::{CountryId, OutputFormat, PhotoSpec, PixelRange};
