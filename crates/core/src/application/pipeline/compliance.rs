// Compliance Enforcer - render exact output pixels and meet the file size cap

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{CropTransform, PhotoSpec, PipelineError};

/// Encoder and finishing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// First JPEG quality tried
    pub start_quality: u8,
    /// Quality decrement per attempt
    pub quality_step: u8,
    /// Contrast boost in percent (0 disables)
    pub contrast: f32,
    /// Unsharp mask radius (0 disables)
    pub sharpen_sigma: f32,
    /// Unsharp mask threshold
    pub sharpen_threshold: i32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            start_quality: 95,
            quality_step: 5,
            contrast: 5.0,
            sharpen_sigma: 0.8,
            sharpen_threshold: 2,
        }
    }
}

/// Encoded output plus the quality that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPhoto {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Number of encodes performed
    pub attempts: u32,
}

pub struct ComplianceEnforcer {
    config: EncoderConfig,
}

impl ComplianceEnforcer {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// `render(image, crop_transform, spec) -> OutputArtifact`
    ///
    /// # Errors
    /// - `SizeLimitUnreachable` if the floor quality still exceeds the cap
    /// - `Internal` if the crop lies outside the image or encoding fails
    pub fn render(
        &self,
        image: &DynamicImage,
        transform: &CropTransform,
        spec: &PhotoSpec,
    ) -> Result<RenderedPhoto, PipelineError> {
        let pixels = self.render_pixels(image, transform)?;
        self.encode_within_limit(&pixels, spec)
    }

    /// Crop, resize to the exact output size, flatten onto white and finish
    pub fn render_pixels(
        &self,
        image: &DynamicImage,
        transform: &CropTransform,
    ) -> Result<RgbImage, PipelineError> {
        let (img_w, img_h) = image.dimensions();
        let src = transform.source;

        let x = src.x.round().max(0.0) as u32;
        let y = src.y.round().max(0.0) as u32;
        if x >= img_w || y >= img_h {
            return Err(PipelineError::Internal(format!(
                "crop {} starts outside {}x{} image",
                src, img_w, img_h
            )));
        }
        let w = (src.width.round() as u32).clamp(1, img_w - x);
        let h = (src.height.round() as u32).clamp(1, img_h - y);

        let resized = image.crop_imm(x, y, w, h).resize_exact(
            transform.output_width,
            transform.output_height,
            FilterType::Lanczos3,
        );
        let mut rgb = flatten_onto_white(&resized);

        if self.config.contrast != 0.0 {
            rgb = imageops::contrast(&rgb, self.config.contrast);
        }
        if self.config.sharpen_sigma > 0.0 {
            rgb = imageops::unsharpen(&rgb, self.config.sharpen_sigma, self.config.sharpen_threshold);
        }

        if rgb.dimensions() != (transform.output_width, transform.output_height) {
            return Err(PipelineError::Internal(format!(
                "rendered {}x{}, expected {}x{}",
                rgb.width(),
                rgb.height(),
                transform.output_width,
                transform.output_height
            )));
        }
        Ok(rgb)
    }

    /// Bounded linear quality search.
    ///
    /// Starts at `start_quality` and steps down by `quality_step` until the
    /// encoding fits `spec.max_file_size_bytes`. The spec's floor quality is
    /// always tried before giving up. Without a cap a single encode is done.
    pub fn encode_within_limit(
        &self,
        pixels: &RgbImage,
        spec: &PhotoSpec,
    ) -> Result<RenderedPhoto, PipelineError> {
        let floor = spec.min_jpeg_quality.clamp(1, 100);
        let mut quality = self.config.start_quality.clamp(floor, 100);
        let step = self.config.quality_step.max(1);
        let mut attempts = 0u32;

        loop {
            let data = encode_jpeg(pixels, quality, spec.dpi)?;
            attempts += 1;
            let size = data.len() as u64;

            let fits = spec.max_file_size_bytes.map_or(true, |limit| size <= limit);
            debug!(quality = quality, bytes = size, fits = fits, "Encoded attempt");

            if fits {
                info!(
                    quality = quality,
                    bytes = size,
                    attempts = attempts,
                    "Output within size limit"
                );
                return Ok(RenderedPhoto {
                    data,
                    width: pixels.width(),
                    height: pixels.height(),
                    quality,
                    attempts,
                });
            }

            if quality <= floor {
                return Err(PipelineError::SizeLimitUnreachable(format!(
                    "{} bytes at minimum quality {} exceeds limit of {} bytes",
                    size,
                    quality,
                    spec.max_file_size_bytes.unwrap_or_default()
                )));
            }
            quality = quality.saturating_sub(step).max(floor);
        }
    }
}

impl Default for ComplianceEnforcer {
    fn default() -> Self {
        Self::new(EncoderConfig::default())
    }
}

/// Composite any alpha onto a white background
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let inv = 1.0 - alpha;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * inv).round() as u8;
        rgb.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

/// Baseline JPEG at `quality` with a JFIF density of `dpi`
pub fn encode_jpeg(pixels: &RgbImage, quality: u8, dpi: u16) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.set_pixel_density(PixelDensity::dpi(dpi));
    encoder
        .write_image(
            pixels.as_raw(),
            pixels.width(),
            pixels.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| PipelineError::Internal(format!("JPEG encode failed: {}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Rect;
    use image::{Rgb, Rgba, RgbaImage};

    /// Deterministic high-frequency content that compresses poorly
    fn noisy(width: u32, height: u32) -> RgbImage {
        let mut state: u32 = 0x1234_5678;
        RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [a, b, c, _] = state.to_le_bytes();
            Rgb([a, b, c])
        })
    }

    fn spec(limit: Option<u64>) -> PhotoSpec {
        let s = PhotoSpec::new("FI", "Finland", 500, 653, 0.724);
        match limit {
            Some(l) => s.with_max_file_size(l),
            None => s,
        }
    }

    #[test]
    fn test_no_limit_encodes_once_at_start_quality() {
        let enforcer = ComplianceEnforcer::default();
        let out = enforcer
            .encode_within_limit(&noisy(64, 64), &spec(None))
            .unwrap();
        assert_eq!(out.quality, 95);
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_unreachable_limit_tries_every_step_to_floor() {
        let enforcer = ComplianceEnforcer::default();
        let err = enforcer
            .encode_within_limit(&noisy(64, 64), &spec(Some(1)))
            .unwrap_err();
        match err {
            PipelineError::SizeLimitUnreachable(detail) => {
                assert!(detail.contains("minimum quality 60"), "{}", detail);
                assert!(detail.contains("limit of 1 bytes"), "{}", detail);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_quality_search_pins_first_fitting_step() {
        let pixels = noisy(96, 96);
        let at_95 = encode_jpeg(&pixels, 95, 300).unwrap().len() as u64;
        let at_90 = encode_jpeg(&pixels, 90, 300).unwrap().len() as u64;
        let at_85 = encode_jpeg(&pixels, 85, 300).unwrap().len() as u64;
        // Noise content: every step down shrinks the file
        assert!(at_85 < at_90 && at_90 < at_95);

        let enforcer = ComplianceEnforcer::default();
        let out = enforcer
            .encode_within_limit(&pixels, &spec(Some(at_85)))
            .unwrap();
        assert_eq!(out.quality, 85);
        assert_eq!(out.attempts, 3);
        assert!(out.data.len() as u64 <= at_85);
    }

    #[test]
    fn test_floor_is_tried_even_off_step() {
        let pixels = noisy(96, 96);
        let at_62 = encode_jpeg(&pixels, 62, 300).unwrap().len() as u64;
        let at_65 = encode_jpeg(&pixels, 65, 300).unwrap().len() as u64;
        assert!(at_62 < at_65);

        let enforcer = ComplianceEnforcer::default();
        let out = enforcer
            .encode_within_limit(&pixels, &spec(Some(at_62)).with_min_jpeg_quality(62))
            .unwrap();
        assert_eq!(out.quality, 62);
    }

    #[test]
    fn test_render_outputs_exact_dimensions() {
        let source = DynamicImage::ImageRgb8(noisy(400, 400));
        let transform = CropTransform {
            source: Rect::new(10.3, 20.7, 200.0, 261.2),
            output_width: 500,
            output_height: 653,
        };
        let enforcer = ComplianceEnforcer::default();
        let out = enforcer.render(&source, &transform, &spec(None)).unwrap();

        assert_eq!((out.width, out.height), (500, 653));
        let decoded = image::load_from_memory(&out.data).unwrap();
        assert_eq!(decoded.dimensions(), (500, 653));
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));
        let rgb = flatten_onto_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));

        let opaque = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255]));
        let rgb = flatten_onto_white(&DynamicImage::ImageRgba8(opaque));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_jfif_density_is_written() {
        let data = encode_jpeg(&noisy(8, 8), 90, 300).unwrap();
        // APP0 JFIF: units=1 (dpi), Xdensity=300, Ydensity=300
        let jfif = data
            .windows(5)
            .position(|w| w == b"JFIF\0")
            .expect("JFIF segment");
        let units = data[jfif + 7];
        let x_density = u16::from_be_bytes([data[jfif + 8], data[jfif + 9]]);
        assert_eq!(units, 1);
        assert_eq!(x_density, 300);
    }
}
