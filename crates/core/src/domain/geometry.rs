// Geometry Domain Model - rectangles in source-image pixel space

use serde::{Deserialize, Serialize};

/// Pixel dimensions of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The whole image as a rectangle
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle of the given size centered on `(cx, cy)`
    pub fn centered(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    /// All components finite and both sides strictly positive
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Whether this rectangle lies inside `bounds`, tolerating `eps` pixels of overshoot
    pub fn is_within(&self, bounds: &Rect, eps: f64) -> bool {
        self.x >= bounds.x - eps
            && self.y >= bounds.y - eps
            && self.right() <= bounds.right() + eps
            && self.bottom() <= bounds.bottom() + eps
    }

    /// Intersection with `bounds`, or `None` when nothing of positive area remains
    pub fn intersect(&self, bounds: &Rect) -> Option<Rect> {
        let x0 = self.x.max(bounds.x);
        let y0 = self.y.max(bounds.y);
        let x1 = self.right().min(bounds.right());
        let y1 = self.bottom().min(bounds.bottom());
        if x1 > x0 && y1 > y0 {
            Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }

    /// Scale both sides by `factor` around the rectangle center
    pub fn scaled_about_center(&self, factor: f64) -> Rect {
        Rect::centered(
            self.center_x(),
            self.center_y(),
            self.width * factor,
            self.height * factor,
        )
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.1}, {:.1}, {:.1}x{:.1})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Which cascade method produced a head estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    PrimaryFace,
    FallbackCascade,
    FallbackPersonHeuristic,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMethod::PrimaryFace => write!(f, "primary_face"),
            DetectionMethod::FallbackCascade => write!(f, "fallback_cascade"),
            DetectionMethod::FallbackPersonHeuristic => write!(f, "fallback_person_heuristic"),
        }
    }
}

/// Raw detector output: a bounding box with a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub rect: Rect,
    pub confidence: f64,
}

impl Detection {
    pub fn new(x: f64, y: f64, width: f64, height: f64, confidence: f64) -> Self {
        Self {
            rect: Rect::new(x, y, width, height),
            confidence,
        }
    }
}

/// Crown-to-chin head estimate in source-image pixel space.
///
/// Invariant: positive size and fully inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadBox {
    pub rect: Rect,
    pub confidence: f64,
    pub method: DetectionMethod,
}

impl HeadBox {
    pub fn new(rect: Rect, confidence: f64, method: DetectionMethod) -> Self {
        Self {
            rect,
            confidence,
            method,
        }
    }

    pub fn height(&self) -> f64 {
        self.rect.height
    }
}

/// User-adjustable crop rectangle in source-image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SelectionRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn as_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

impl From<Rect> for SelectionRect {
    fn from(r: Rect) -> Self {
        Self::new(r.x, r.y, r.width, r.height)
    }
}

impl std::str::FromStr for SelectionRect {
    type Err = String;

    /// Parse `x,y,width,height`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| format!("invalid selection '{}': {}", s, e))?;
        match parts.as_slice() {
            [x, y, w, h] if parts.iter().all(|v| v.is_finite()) => Ok(Self::new(*x, *y, *w, *h)),
            [_, _, _, _] => Err(format!("invalid selection '{}': values must be finite", s)),
            _ => Err(format!(
                "invalid selection '{}': expected x,y,width,height",
                s
            )),
        }
    }
}

/// A single source rectangle to be scaled to the exact output size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropTransform {
    pub source: Rect,
    pub output_width: u32,
    pub output_height: u32,
}

impl CropTransform {
    /// Output pixels per source pixel
    pub fn scale(&self) -> f64 {
        self.output_height as f64 / self.source.height
    }

    /// Map a source-space y coordinate into output space
    pub fn to_output_y(&self, source_y: f64) -> f64 {
        (source_y - self.source.y) * self.scale()
    }

    /// Map a source-space x coordinate into output space
    pub fn to_output_x(&self, source_x: f64) -> f64 {
        (source_x - self.source.x) * self.scale()
    }
}
