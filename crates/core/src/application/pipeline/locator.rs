// Head Locator - ordered cascade of detection strategies

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{DetectionMethod, HeadBox, ImageSize, PipelineError, Rect};
use crate::port::Detector;

/// Locator tuning knobs (thresholds and head-estimation ratios)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub primary_min_confidence: f64,
    pub cascade_min_confidence: f64,
    pub person_min_confidence: f64,
    /// Face box -> crown-to-chin expansion for the primary detector
    pub primary_expansion: f64,
    /// Face box -> crown-to-chin expansion for the cascade detector
    pub cascade_expansion: f64,
    /// Fraction of the person box height taken as the head
    pub person_head_ratio: f64,
    /// Two candidates within this relative area of each other are ambiguous
    pub ambiguity_tolerance: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            primary_min_confidence: 0.3,
            cascade_min_confidence: 0.5,
            person_min_confidence: 0.5,
            primary_expansion: 1.4,
            cascade_expansion: 1.3,
            person_head_ratio: 0.28,
            ambiguity_tolerance: 0.10,
        }
    }
}

/// How a stage turns a raw detection into a crown-to-chin estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadEstimate {
    /// Scale the face box about its centroid
    ExpandFace { ratio: f64 },
    /// Top slice of a whole-person box
    PersonTop { head_ratio: f64 },
}

impl HeadEstimate {
    fn estimate(&self, detection: &Rect, bounds: &Rect) -> Option<Rect> {
        let raw = match *self {
            HeadEstimate::ExpandFace { ratio } => detection.scaled_about_center(ratio),
            HeadEstimate::PersonTop { head_ratio } => {
                let head_h = detection.height * head_ratio;
                let head_w = detection.width.min(head_h);
                Rect::new(
                    detection.center_x() - head_w / 2.0,
                    detection.y,
                    head_w,
                    head_h,
                )
            }
        };
        raw.intersect(bounds).filter(Rect::is_valid)
    }
}

/// One entry of the cascade table
pub struct CascadeStage {
    pub method: DetectionMethod,
    pub detector: Arc<dyn Detector>,
    pub min_confidence: f64,
    pub estimate: HeadEstimate,
}

struct Candidate {
    detection: Rect,
    confidence: f64,
}

/// Cascading head locator.
///
/// Stages are tried in table order. A stage that errors, finds nothing, or
/// finds nothing above its threshold falls through to the next one; the first
/// stage with a usable candidate decides the result.
pub struct HeadLocator {
    stages: Vec<CascadeStage>,
    ambiguity_tolerance: f64,
}

impl HeadLocator {
    pub fn new(stages: Vec<CascadeStage>, ambiguity_tolerance: f64) -> Self {
        Self {
            stages,
            ambiguity_tolerance,
        }
    }

    /// Standard three-method cascade: primary face, cascade face, person
    pub fn from_detectors(
        primary: Arc<dyn Detector>,
        cascade: Arc<dyn Detector>,
        person: Arc<dyn Detector>,
        config: &LocatorConfig,
    ) -> Self {
        let stages = vec![
            CascadeStage {
                method: DetectionMethod::PrimaryFace,
                detector: primary,
                min_confidence: config.primary_min_confidence,
                estimate: HeadEstimate::ExpandFace {
                    ratio: config.primary_expansion,
                },
            },
            CascadeStage {
                method: DetectionMethod::FallbackCascade,
                detector: cascade,
                min_confidence: config.cascade_min_confidence,
                estimate: HeadEstimate::ExpandFace {
                    ratio: config.cascade_expansion,
                },
            },
            CascadeStage {
                method: DetectionMethod::FallbackPersonHeuristic,
                detector: person,
                min_confidence: config.person_min_confidence,
                estimate: HeadEstimate::PersonTop {
                    head_ratio: config.person_head_ratio,
                },
            },
        ];
        Self::new(stages, config.ambiguity_tolerance)
    }

    /// `locate(image) -> HeadBox`
    ///
    /// # Errors
    /// - `MultipleHeadsAmbiguous` if the deciding stage has two top candidates of near-equal area
    /// - `NoHeadFound` if every stage falls through
    pub fn locate(&self, image: &DynamicImage) -> Result<HeadBox, PipelineError> {
        let (width, height) = image.dimensions();
        let bounds = ImageSize::new(width, height).bounds();

        for stage in &self.stages {
            let detections = match stage.detector.detect(image) {
                Ok(d) => d,
                Err(e) => {
                    warn!(method = %stage.method, error = %e, "Detector failed, falling through");
                    continue;
                }
            };

            let mut candidates: Vec<Candidate> = detections
                .iter()
                .filter(|d| d.confidence.is_finite() && d.confidence >= stage.min_confidence)
                .filter(|d| d.rect.is_valid())
                .filter_map(|d| {
                    d.rect.intersect(&bounds).map(|r| Candidate {
                        detection: r,
                        confidence: d.confidence,
                    })
                })
                .collect();

            if candidates.is_empty() {
                debug!(
                    method = %stage.method,
                    raw = detections.len(),
                    threshold = stage.min_confidence,
                    "No candidate above threshold, falling through"
                );
                continue;
            }

            candidates.sort_by(|a, b| b.detection.area().total_cmp(&a.detection.area()));

            if let [first, second, ..] = candidates.as_slice() {
                let largest = first.detection.area();
                let gap = (largest - second.detection.area()) / largest;
                if gap <= self.ambiguity_tolerance {
                    return Err(PipelineError::MultipleHeadsAmbiguous(format!(
                        "{} found {} candidates, the two largest differ by {:.1}% in area",
                        stage.method,
                        candidates.len(),
                        gap * 100.0
                    )));
                }
            }

            let best = &candidates[0];
            let Some(head) = stage.estimate.estimate(&best.detection, &bounds) else {
                debug!(method = %stage.method, "Head estimate degenerate after clipping");
                continue;
            };

            info!(
                method = %stage.method,
                confidence = best.confidence,
                head = %head,
                "Head located"
            );
            return Ok(HeadBox::new(
                head,
                best.confidence.clamp(0.0, 1.0),
                stage.method,
            ));
        }

        Err(PipelineError::NoHeadFound(format!(
            "all {} detection methods failed on {}x{} image",
            self.stages.len(),
            width,
            height
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Detection;
    use crate::port::vision::mocks::StaticDetector;
    use crate::port::vision::MockDetector;
    use crate::port::VisionError;

    fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, height)
    }

    fn never_called() -> Arc<dyn Detector> {
        let mut mock = MockDetector::new();
        mock.expect_detect().times(0);
        Arc::new(mock)
    }

    fn locator(
        primary: Arc<dyn Detector>,
        cascade: Arc<dyn Detector>,
        person: Arc<dyn Detector>,
    ) -> HeadLocator {
        HeadLocator::from_detectors(primary, cascade, person, &LocatorConfig::default())
    }

    #[test]
    fn test_primary_hit_short_circuits_cascade() {
        let mut primary = MockDetector::new();
        primary
            .expect_detect()
            .times(1)
            .returning(|_| Ok(vec![Detection::new(400.0, 300.0, 200.0, 200.0, 0.3)]));

        let loc = locator(Arc::new(primary), never_called(), never_called());
        let head = loc.locate(&blank(1000, 1000)).unwrap();

        assert_eq!(head.method, DetectionMethod::PrimaryFace);
        // 200 * 1.4 about the centre (500, 400)
        assert!((head.rect.height - 280.0).abs() < 1e-9);
        assert!((head.rect.center_x() - 500.0).abs() < 1e-9);
        assert!((head.rect.center_y() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_below_threshold_falls_through_to_cascade() {
        let primary = Arc::new(StaticDetector::new(vec![Detection::new(
            10.0, 10.0, 50.0, 50.0, 0.29,
        )]));
        let cascade = Arc::new(StaticDetector::new(vec![Detection::new(
            100.0, 100.0, 100.0, 100.0, 0.6,
        )]));
        let person = Arc::new(StaticDetector::empty());

        let loc = locator(primary.clone(), cascade.clone(), person.clone());
        let head = loc.locate(&blank(600, 600)).unwrap();

        assert_eq!(head.method, DetectionMethod::FallbackCascade);
        assert!((head.rect.height - 130.0).abs() < 1e-9);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(cascade.call_count(), 1);
        assert_eq!(person.call_count(), 0);
    }

    #[test]
    fn test_person_heuristic_takes_top_slice() {
        let primary = Arc::new(StaticDetector::empty());
        let cascade = Arc::new(StaticDetector::failing("model missing"));
        let person = Arc::new(StaticDetector::new(vec![Detection::new(
            200.0, 100.0, 300.0, 1000.0, 0.7,
        )]));

        let loc = locator(primary, cascade, person);
        let head = loc.locate(&blank(800, 1200)).unwrap();

        assert_eq!(head.method, DetectionMethod::FallbackPersonHeuristic);
        assert!((head.rect.y - 100.0).abs() < 1e-9);
        assert!((head.rect.height - 280.0).abs() < 1e-9);
        assert!((head.rect.width - 280.0).abs() < 1e-9);
        assert!((head.rect.center_x() - 350.0).abs() < 1e-9);
        assert!((head.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_expansion_is_clipped_to_image() {
        let primary = Arc::new(StaticDetector::new(vec![Detection::new(
            0.0, 0.0, 100.0, 100.0, 0.9,
        )]));
        let loc = locator(primary, never_called(), never_called());
        let head = loc.locate(&blank(300, 300)).unwrap();

        assert_eq!(head.rect.x, 0.0);
        assert_eq!(head.rect.y, 0.0);
        assert!((head.rect.width - 120.0).abs() < 1e-9);
        assert!(head.rect.is_within(&ImageSize::new(300, 300).bounds(), 0.0));
    }

    #[test]
    fn test_two_equal_faces_are_ambiguous() {
        let primary = Arc::new(StaticDetector::new(vec![
            Detection::new(100.0, 100.0, 150.0, 150.0, 0.8),
            Detection::new(500.0, 110.0, 148.0, 148.0, 0.8),
        ]));
        let loc = locator(primary, never_called(), never_called());

        let err = loc.locate(&blank(800, 600)).unwrap_err();
        assert!(matches!(err, PipelineError::MultipleHeadsAmbiguous(_)));
    }

    #[test]
    fn test_clearly_largest_face_wins() {
        let primary = Arc::new(StaticDetector::new(vec![
            Detection::new(500.0, 100.0, 80.0, 80.0, 0.95),
            Detection::new(100.0, 100.0, 200.0, 200.0, 0.6),
        ]));
        let loc = locator(primary, never_called(), never_called());

        let head = loc.locate(&blank(800, 600)).unwrap();
        assert!((head.rect.center_x() - 200.0).abs() < 1e-9);
        assert!((head.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_duplicate_is_not_ambiguous() {
        let primary = Arc::new(StaticDetector::new(vec![
            Detection::new(100.0, 100.0, 150.0, 150.0, 0.8),
            Detection::new(500.0, 100.0, 150.0, 150.0, 0.1),
        ]));
        let loc = locator(primary, never_called(), never_called());
        assert!(loc.locate(&blank(800, 600)).is_ok());
    }

    #[test]
    fn test_all_methods_fail_is_no_head() {
        let primary = Arc::new(StaticDetector::empty());
        let cascade = Arc::new(StaticDetector::new(vec![Detection::new(
            f64::NAN, 0.0, 10.0, 10.0, 0.9,
        )]));
        let mut person = MockDetector::new();
        person
            .expect_detect()
            .times(1)
            .returning(|_| Err(VisionError::Unavailable("no model".to_string())));

        let loc = locator(primary, cascade, Arc::new(person));
        let err = loc.locate(&blank(400, 400)).unwrap_err();
        assert!(matches!(err, PipelineError::NoHeadFound(_)));
    }

    #[test]
    fn test_detection_outside_image_is_ignored() {
        let primary = Arc::new(StaticDetector::new(vec![Detection::new(
            900.0, 900.0, 50.0, 50.0, 0.9,
        )]));
        let cascade = Arc::new(StaticDetector::empty());
        let person = Arc::new(StaticDetector::empty());
        let loc = locator(primary, cascade, person);

        let err = loc.locate(&blank(400, 400)).unwrap_err();
        assert!(matches!(err, PipelineError::NoHeadFound(_)));
    }
}
