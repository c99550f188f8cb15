// SeetaFace frontal face detector (rustface), used as the cascade stage

use image::DynamicImage;
use std::path::Path;
use tracing::debug;

use photospec_core::domain::Detection;
use photospec_core::error::{AppError, Result};
use photospec_core::port::{Detector, VisionError};

/// Raw SeetaFace score that maps to confidence 0.5
const SCORE_MIDPOINT: f64 = 2.0;

/// Smallest face searched for, in pixels
const MIN_FACE_SIZE_PX: u32 = 20;

pub struct SeetaFaceDetector {
    model: rustface::Model,
}

impl SeetaFaceDetector {
    /// Load a `seeta_fd_frontal_v1.0.bin` model file
    pub fn from_model_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            AppError::Config(format!("Cannot read SeetaFace model {}: {}", path.display(), e))
        })?;
        let model = rustface::read_model(std::io::Cursor::new(data)).map_err(|e| {
            AppError::Config(format!("Invalid SeetaFace model {}: {}", path.display(), e))
        })?;
        Ok(Self { model })
    }
}

/// Squash the unbounded SeetaFace score into 0..1
fn confidence(score: f64) -> f64 {
    if score <= 0.0 {
        0.0
    } else {
        score / (score + SCORE_MIDPOINT)
    }
}

impl Detector for SeetaFaceDetector {
    fn detect(&self, image: &DynamicImage) -> std::result::Result<Vec<Detection>, VisionError> {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();

        // rustface detectors are stateful; one per call keeps this Sync
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(MIN_FACE_SIZE_PX);
        detector.set_score_thresh(SCORE_MIDPOINT);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
        debug!(faces = faces.len(), "SeetaFace detection finished");

        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                Detection::new(
                    bbox.x() as f64,
                    bbox.y() as f64,
                    bbox.width() as f64,
                    bbox.height() as f64,
                    confidence(face.score()),
                )
            })
            .collect())
    }
}
