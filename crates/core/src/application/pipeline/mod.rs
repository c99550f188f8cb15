// Compliance Pipeline - decode, remove background, locate, transform, render
//
// Synchronous by contract: the vision calls may block for the duration of
// inference, so callers run this on a blocking thread.

pub mod compliance;
pub mod locator;
pub mod transform;

pub use compliance::{ComplianceEnforcer, EncoderConfig, RenderedPhoto};
pub use locator::{CascadeStage, HeadEstimate, HeadLocator, LocatorConfig};
pub use transform::{compute_transform, default_selection, normalize_selection};

use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{HeadBox, ImageSize, JobMode, PhotoSpec, PipelineError, SelectionRect};
use crate::port::BackgroundRemover;

/// Input formats accepted for decode
pub const SUPPORTED_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Manual workflow, first phase: intermediate image plus suggested crop
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Background-removed image encoded as PNG
    pub image_data: Vec<u8>,
    pub image_format: ImageFormat,
    pub image_size: ImageSize,
    pub head_box: HeadBox,
    pub default_selection: SelectionRect,
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, PipelineError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::DecodeFailed(e.to_string()))?;
    match reader.format() {
        Some(format) if SUPPORTED_FORMATS.contains(&format) => Ok(reader),
        Some(format) => Err(PipelineError::DecodeFailed(format!(
            "unsupported image format {:?}",
            format
        ))),
        None => Err(PipelineError::DecodeFailed(
            "unrecognized image format".to_string(),
        )),
    }
}

/// Sniff format and dimensions without decoding pixels
pub fn probe_image(bytes: &[u8]) -> Result<(ImageFormat, ImageSize), PipelineError> {
    let reader = reader(bytes)?;
    let format = reader
        .format()
        .ok_or_else(|| PipelineError::DecodeFailed("unrecognized image format".to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| PipelineError::DecodeFailed(e.to_string()))?;
    Ok((format, ImageSize::new(width, height)))
}

/// Decode JPEG/PNG/WEBP bytes, applying any EXIF orientation
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let mut decoder = reader(bytes)?
        .into_decoder()
        .map_err(|e| PipelineError::DecodeFailed(e.to_string()))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| PipelineError::DecodeFailed(e.to_string()))?;
    if orientation != Orientation::NoTransforms {
        debug!(orientation = ?orientation, "Applying EXIF orientation");
        image.apply_orientation(orientation);
    }
    Ok(image)
}

fn size_of(image: &DynamicImage) -> ImageSize {
    let (width, height) = image.dimensions();
    ImageSize::new(width, height)
}

/// Stateless orchestration of the compliance stages for one job
pub struct CompliancePipeline {
    remover: Arc<dyn BackgroundRemover>,
    locator: HeadLocator,
    enforcer: ComplianceEnforcer,
}

impl CompliancePipeline {
    pub fn new(
        remover: Arc<dyn BackgroundRemover>,
        locator: HeadLocator,
        enforcer: ComplianceEnforcer,
    ) -> Self {
        Self {
            remover,
            locator,
            enforcer,
        }
    }

    /// Run the stages selected by the job mode
    pub fn process(
        &self,
        input: &[u8],
        mode: &JobMode,
        spec: &PhotoSpec,
    ) -> Result<RenderedPhoto, PipelineError> {
        match mode {
            JobMode::Auto => self.process_auto(input, spec),
            JobMode::Manual { selection } => self.process_manual(input, selection, spec),
        }
    }

    /// Background Remover -> Head Locator -> Transform Engine -> Compliance Enforcer
    pub fn process_auto(
        &self,
        input: &[u8],
        spec: &PhotoSpec,
    ) -> Result<RenderedPhoto, PipelineError> {
        let original = decode_image(input)?;
        let cutout = self.remove_background(&original)?;
        let head = self.locator.locate(&original)?;
        let transform = compute_transform(size_of(&cutout), &head, spec)?;
        info!(
            country = %spec.country_id,
            method = %head.method,
            crop = %transform.source,
            "Auto transform computed"
        );
        self.enforcer.render(&cutout, &transform, spec)
    }

    /// Manual workflow, first phase
    pub fn prepare(&self, input: &[u8], spec: &PhotoSpec) -> Result<PreparedImage, PipelineError> {
        let original = decode_image(input)?;
        let cutout = self.remove_background(&original)?;
        let head = self.locator.locate(&original)?;
        let image_size = size_of(&cutout);
        let selection = default_selection(image_size, &head, spec)?;

        let mut image_data = Vec::new();
        cutout
            .write_to(&mut Cursor::new(&mut image_data), ImageFormat::Png)
            .map_err(|e| PipelineError::Internal(format!("PNG encode failed: {}", e)))?;

        Ok(PreparedImage {
            image_data,
            image_format: ImageFormat::Png,
            image_size,
            head_box: head,
            default_selection: selection,
        })
    }

    /// Manual workflow, second phase: Transform Engine -> Compliance Enforcer on
    /// an already background-removed image, without re-detection
    pub fn process_manual(
        &self,
        intermediate: &[u8],
        selection: &SelectionRect,
        spec: &PhotoSpec,
    ) -> Result<RenderedPhoto, PipelineError> {
        let image = decode_image(intermediate)?;
        let transform = normalize_selection(selection, size_of(&image), spec)?;
        info!(
            country = %spec.country_id,
            crop = %transform.source,
            "Manual selection normalized"
        );
        self.enforcer.render(&image, &transform, spec)
    }

    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage, PipelineError> {
        let cutout = self
            .remover
            .remove_background(image)
            .map_err(|e| PipelineError::BackgroundRemovalFailed(e.to_string()))?;
        if cutout.dimensions() != image.dimensions() {
            return Err(PipelineError::BackgroundRemovalFailed(format!(
                "returned {}x{} for a {}x{} input",
                cutout.width(),
                cutout.height(),
                image.width(),
                image.height()
            )));
        }
        Ok(cutout)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::encoded;
    use super::*;
    use crate::domain::{Detection, DetectionMethod, PixelRange};
    use crate::port::vision::mocks::{MockBackgroundRemover, StaticDetector};

    fn finland() -> PhotoSpec {
        PhotoSpec::new("FI", "Finland", 500, 653, 0.724)
            .with_top_margin(PixelRange::new(56, 84))
            .with_bottom_margin(PixelRange::new(96, 124))
            .with_max_file_size(250_000)
    }

    fn pipeline(remover: Arc<MockBackgroundRemover>, faces: Vec<Detection>) -> CompliancePipeline {
        let locator = HeadLocator::from_detectors(
            Arc::new(StaticDetector::new(faces)),
            Arc::new(StaticDetector::empty()),
            Arc::new(StaticDetector::empty()),
            &LocatorConfig::default(),
        );
        CompliancePipeline::new(remover, locator, ComplianceEnforcer::default())
    }

    /// Face whose 1.4x expansion is a 300px-tall head at (465, 450)
    fn centred_face() -> Detection {
        let h = 300.0 / 1.4;
        Detection::new(465.0 - h / 2.0, 450.0 - h / 2.0, h, h, 0.9)
    }

    #[test]
    fn test_decode_rejects_garbage_and_unsupported_formats() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::DecodeFailed(_)));

        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        match decode_image(gif).unwrap_err() {
            PipelineError::DecodeFailed(detail) => assert!(detail.contains("Gif"), "{}", detail),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_probe_reports_format_and_size() {
        let png = encoded(320, 240, ImageFormat::Png);
        let (format, size) = probe_image(&png).unwrap();
        assert_eq!(format, ImageFormat::Png);
        assert_eq!(size, ImageSize::new(320, 240));
    }

    #[test]
    fn test_auto_renders_exact_compliant_jpeg() {
        let remover = Arc::new(MockBackgroundRemover::pass_through());
        let p = pipeline(remover.clone(), vec![centred_face()]);
        let input = encoded(1200, 1600, ImageFormat::Jpeg);

        match p.process(&input, &JobMode::Auto, &finland()) {
            Ok(out) => {
                assert_eq!((out.width, out.height), (500, 653));
                assert!(out.data.len() as u64 <= 250_000);
                assert!(out.quality >= 60);
            }
            Err(PipelineError::SizeLimitUnreachable(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(remover.call_count(), 1);
    }

    #[test]
    fn test_background_failure_is_typed() {
        let remover = Arc::new(MockBackgroundRemover::failing("model crashed"));
        let p = pipeline(remover, vec![centred_face()]);
        let input = encoded(1200, 1600, ImageFormat::Png);

        let err = p.process_auto(&input, &finland()).unwrap_err();
        match err {
            PipelineError::BackgroundRemovalFailed(detail) => assert!(detail.contains("model crashed")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_no_head_short_circuits_before_render() {
        let remover = Arc::new(MockBackgroundRemover::pass_through());
        let p = pipeline(remover, vec![]);
        let input = encoded(600, 800, ImageFormat::Png);

        let err = p.process_auto(&input, &finland()).unwrap_err();
        assert!(matches!(err, PipelineError::NoHeadFound(_)));
    }

    #[test]
    fn test_prepare_then_manual_render() {
        let remover = Arc::new(MockBackgroundRemover::pass_through());
        let p = pipeline(remover.clone(), vec![centred_face()]);
        let input = encoded(1200, 1600, ImageFormat::Jpeg);

        let prepared = p.prepare(&input, &finland()).unwrap();
        assert_eq!(prepared.image_format, ImageFormat::Png);
        assert_eq!(prepared.image_size, ImageSize::new(1200, 1600));
        assert_eq!(prepared.head_box.method, DetectionMethod::PrimaryFace);
        let sel = prepared.default_selection.as_rect();
        assert!((sel.aspect_ratio() - finland().aspect_ratio()).abs() < 1e-9);

        let spec = finland().with_max_file_size(u64::MAX);
        let out = p
            .process_manual(&prepared.image_data, &prepared.default_selection, &spec)
            .unwrap();
        assert_eq!((out.width, out.height), (500, 653));
        // Manual phase never re-runs background removal
        assert_eq!(remover.call_count(), 1);
    }

    #[test]
    fn test_manual_rejects_selection_outside_image() {
        let remover = Arc::new(MockBackgroundRemover::pass_through());
        let p = pipeline(remover, vec![]);
        let intermediate = encoded(400, 400, ImageFormat::Png);

        let err = p
            .process_manual(
                &intermediate,
                &SelectionRect::new(1000.0, 1000.0, 50.0, 50.0),
                &finland(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::SelectionOutOfBounds(_)));
    }
}
