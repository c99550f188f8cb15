// Photospec Infrastructure - System Adapters
// Implements: ArtifactStore, BackgroundRemover, Detector

pub mod fs_artifact_store;
#[cfg(feature = "seetaface")]
pub mod seetaface;
pub mod subprocess_vision;

pub use fs_artifact_store::FsArtifactStore;
#[cfg(feature = "seetaface")]
pub use seetaface::SeetaFaceDetector;
pub use subprocess_vision::{
    NoopDetector, PassThroughRemover, SubprocessBackgroundRemover, SubprocessCommand,
    SubprocessDetector, DEFAULT_ENV_ALLOWLIST,
};
