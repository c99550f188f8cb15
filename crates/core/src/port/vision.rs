// Vision Ports - black-box background removal and detection capabilities
//
// Calls are synchronous and may block for the duration of inference. The
// pipeline invokes them from a blocking worker thread, so implementations
// must be safe to share across threads.

use image::DynamicImage;
use thiserror::Error;

use crate::domain::Detection;

/// Vision backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VisionError {
    #[error("Backend failed: {0}")]
    Backend(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid backend output: {0}")]
    InvalidOutput(String),
}

/// `remove_background(image) -> image_with_alpha`
pub trait BackgroundRemover: Send + Sync {
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, VisionError>;
}

/// Any detector returning `(bbox, confidence)` candidates in source pixel space.
///
/// Used for the primary face detector, the cascade face detector and the
/// whole-person detector alike.
#[cfg_attr(test, mockall::automock)]
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, VisionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Background remover behavior
    #[derive(Debug, Clone)]
    pub enum RemoverBehavior {
        /// Return the input converted to RGBA
        PassThrough,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    pub struct MockBackgroundRemover {
        behavior: RemoverBehavior,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockBackgroundRemover {
        pub fn new(behavior: RemoverBehavior) -> Self {
            Self {
                behavior,
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn pass_through() -> Self {
            Self::new(RemoverBehavior::PassThrough)
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self::new(RemoverBehavior::Fail(message.into()))
        }

        pub fn panicking(message: impl Into<String>) -> Self {
            Self::new(RemoverBehavior::Panic(message.into()))
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    impl BackgroundRemover for MockBackgroundRemover {
        fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, VisionError> {
            *self.call_count.lock().unwrap() += 1;
            match &self.behavior {
                RemoverBehavior::PassThrough => Ok(DynamicImage::ImageRgba8(image.to_rgba8())),
                RemoverBehavior::Fail(msg) => Err(VisionError::Backend(msg.clone())),
                RemoverBehavior::Panic(msg) => panic!("{}", msg),
            }
        }
    }

    /// Detector that returns the same canned candidates on every call
    pub struct StaticDetector {
        result: Result<Vec<Detection>, VisionError>,
        call_count: Arc<Mutex<usize>>,
    }

    impl StaticDetector {
        pub fn new(detections: Vec<Detection>) -> Self {
            Self {
                result: Ok(detections),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn empty() -> Self {
            Self::new(Vec::new())
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                result: Err(VisionError::Backend(message.into())),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    impl Detector for StaticDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
            *self.call_count.lock().unwrap() += 1;
            self.result.clone()
        }
    }
}
