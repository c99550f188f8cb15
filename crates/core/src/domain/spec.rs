// Photo Specification Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Country / document identifier (e.g. "FI", "US")
pub type CountryId = String;

/// Default print density written into JFIF headers
pub const DEFAULT_DPI: u16 = 300;

/// Default quality floor below which output is non-compliant
pub const DEFAULT_MIN_JPEG_QUALITY: u8 = 60;

/// Crown position used when a spec defines no margin ranges (fraction of output height)
pub const CANONICAL_CROWN_RATIO: f64 = 1.0 / 7.0;

/// Inclusive pixel range, e.g. an allowed top margin of 56..=84 px
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRange {
    pub min: u32,
    pub max: u32,
}

impl PixelRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min as f64 + self.max as f64) / 2.0
    }

    /// Whether `value` falls inside the range, allowing `slack` pixels on either side
    pub fn contains(&self, value: f64, slack: f64) -> bool {
        value >= self.min as f64 - slack && value <= self.max as f64 + slack
    }
}

impl std::fmt::Display for PixelRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}px", self.min, self.max)
    }
}

/// Output encoding. Passport offices accept JPEG only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    #[default]
    Jpeg,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Immutable document photo requirements for one country
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSpec {
    pub country_id: CountryId,
    pub name: String,
    pub output_width_px: u32,
    pub output_height_px: u32,
    /// Fraction of the output height occupied crown-to-chin
    pub head_height_ratio: f64,
    pub top_margin_px_range: Option<PixelRange>,
    pub bottom_margin_px_range: Option<PixelRange>,
    /// `None` for countries without a file size cap
    pub max_file_size_bytes: Option<u64>,
    #[serde(default)]
    pub output_format: OutputFormat,
    pub min_jpeg_quality: u8,
    #[serde(default = "default_dpi")]
    pub dpi: u16,
}

fn default_dpi() -> u16 {
    DEFAULT_DPI
}

impl PhotoSpec {
    /// Create a spec without margin ranges or size cap
    pub fn new(
        country_id: impl Into<String>,
        name: impl Into<String>,
        output_width_px: u32,
        output_height_px: u32,
        head_height_ratio: f64,
    ) -> Self {
        Self {
            country_id: country_id.into(),
            name: name.into(),
            output_width_px,
            output_height_px,
            head_height_ratio,
            top_margin_px_range: None,
            bottom_margin_px_range: None,
            max_file_size_bytes: None,
            output_format: OutputFormat::Jpeg,
            min_jpeg_quality: DEFAULT_MIN_JPEG_QUALITY,
            dpi: DEFAULT_DPI,
        }
    }

    pub fn with_top_margin(mut self, range: PixelRange) -> Self {
        self.top_margin_px_range = Some(range);
        self
    }

    pub fn with_bottom_margin(mut self, range: PixelRange) -> Self {
        self.bottom_margin_px_range = Some(range);
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = Some(bytes);
        self
    }

    pub fn with_min_jpeg_quality(mut self, quality: u8) -> Self {
        self.min_jpeg_quality = quality;
        self
    }

    /// Target aspect ratio (width / height)
    pub fn aspect_ratio(&self) -> f64 {
        self.output_width_px as f64 / self.output_height_px as f64
    }

    /// Desired crown-to-chin height in output pixels
    pub fn target_head_height_px(&self) -> f64 {
        self.head_height_ratio * self.output_height_px as f64
    }

    /// Where the crown should sit in the output, in pixels from the top.
    ///
    /// Midpoint of the top margin range when defined; otherwise derived from the
    /// bottom margin range; otherwise the canonical 1/7 of the frame.
    pub fn target_crown_y_px(&self) -> f64 {
        if let Some(top) = self.top_margin_px_range {
            return top.midpoint();
        }
        if let Some(bottom) = self.bottom_margin_px_range {
            return self.output_height_px as f64 - bottom.midpoint() - self.target_head_height_px();
        }
        self.output_height_px as f64 * CANONICAL_CROWN_RATIO
    }

    /// Validate internal consistency of the spec
    pub fn validate(&self) -> Result<()> {
        if self.country_id.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "country id cannot be empty".to_string(),
            ));
        }
        if self.output_width_px == 0 || self.output_height_px == 0 {
            return Err(DomainError::ValidationError(format!(
                "{}: output dimensions must be non-zero, got {}x{}",
                self.country_id, self.output_width_px, self.output_height_px
            )));
        }
        if !(self.head_height_ratio > 0.0 && self.head_height_ratio <= 1.0) {
            return Err(DomainError::ValidationError(format!(
                "{}: head height ratio must be in (0, 1], got {}",
                self.country_id, self.head_height_ratio
            )));
        }
        if self.min_jpeg_quality == 0 || self.min_jpeg_quality > 100 {
            return Err(DomainError::ValidationError(format!(
                "{}: min JPEG quality must be in 1..=100, got {}",
                self.country_id, self.min_jpeg_quality
            )));
        }
        for (label, range) in [
            ("top", self.top_margin_px_range),
            ("bottom", self.bottom_margin_px_range),
        ] {
            if let Some(r) = range {
                if r.min > r.max || r.max > self.output_height_px {
                    return Err(DomainError::ValidationError(format!(
                        "{}: invalid {} margin range {}",
                        self.country_id, label, r
                    )));
                }
            }
        }
        let crown = self.target_crown_y_px();
        let chin = crown + self.target_head_height_px();
        if crown < 0.0 || chin > self.output_height_px as f64 + 0.5 {
            return Err(DomainError::ValidationError(format!(
                "{}: head placement {:.1}..{:.1} does not fit a {}px frame",
                self.country_id, crown, chin, self.output_height_px
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finland() -> PhotoSpec {
        PhotoSpec::new("FI", "Finland", 500, 653, 0.724)
            .with_top_margin(PixelRange::new(56, 84))
            .with_bottom_margin(PixelRange::new(96, 124))
            .with_max_file_size(250_000)
    }

    #[test]
    fn test_aspect_and_head_height() {
        let spec = finland();
        assert!((spec.aspect_ratio() - 500.0 / 653.0).abs() < 1e-12);
        assert!((spec.target_head_height_px() - 472.772).abs() < 1e-3);
    }

    #[test]
    fn test_crown_uses_top_margin_midpoint() {
        assert!((finland().target_crown_y_px() - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_crown_from_bottom_margin_only() {
        let spec = PhotoSpec::new("XX", "Bottom only", 400, 500, 0.6)
            .with_bottom_margin(PixelRange::new(90, 110));
        // 500 - 100 - 300
        assert!((spec.target_crown_y_px() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_crown_canonical_without_margins() {
        let spec = PhotoSpec::new("US", "United States", 600, 600, 0.6);
        assert!((spec.target_crown_y_px() - 600.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_accepts_finland() {
        assert!(finland().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PhotoSpec::new("XX", "x", 0, 100, 0.5).validate().is_err());
        assert!(PhotoSpec::new("XX", "x", 100, 100, 1.5).validate().is_err());
        assert!(PhotoSpec::new("XX", "x", 100, 100, 0.5)
            .with_min_jpeg_quality(0)
            .validate()
            .is_err());
        assert!(PhotoSpec::new("XX", "x", 100, 100, 0.5)
            .with_top_margin(PixelRange::new(50, 10))
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_head_overflowing_frame() {
        // crown at 80 + head 95 > 100
        let spec = PhotoSpec::new("XX", "x", 100, 100, 0.95).with_top_margin(PixelRange::new(70, 90));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_pixel_range_contains_with_slack() {
        let r = PixelRange::new(56, 84);
        assert!(r.contains(56.0, 0.0));
        assert!(r.contains(84.4, 0.5));
        assert!(!r.contains(85.0, 0.5));
    }
}
