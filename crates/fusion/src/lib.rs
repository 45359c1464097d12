//! Region fusion - merging OCR text boxes and icon detections
//!
//! Combines the two box sets into one element set. Text regions are treated
//! as authoritative and are always kept; icon detections are admitted
//! greedily in score order while suppressing duplicates and detections that
//! turn out to bound a piece of text. The fused ordering (text regions in
//! extractor order, then icon regions in score-descending order) is the id
//! contract downstream consumers depend on.
//!
//! # Example
//! ```
//! use screen_parse_common::{BoundingBox, OcrSpan, RawDetection};
//! use screen_parse_fusion::fuse;
//!
//! let text = vec![OcrSpan {
//!     bounds: BoundingBox::new(10.0, 10.0, 100.0, 30.0),
//!     text: "Submit".to_string(),
//!     confidence: None,
//! }];
//! let icons = vec![RawDetection {
//!     bounds: BoundingBox::new(12.0, 12.0, 98.0, 28.0),
//!     score: 0.9,
//! }];
//!
//! // The detection duplicates the text region, so fusion drops it.
//! let fused = fuse(&text, &icons, 0.1);
//! assert_eq!(fused.len(), 1);
//! ```

mod labeler;

pub use labeler::{label_elements, CROP_MARGIN_PX};

use serde::{Deserialize, Serialize};
use tracing::debug;

use screen_parse_common::{BoundingBox, ElementKind, OcrSpan, RawDetection};

/// Intersection-over-smaller-area above which an icon detection and a text
/// box are considered the same region, with the detection treated as a
/// mis-detected container and dropped.
pub const CONTAINMENT_THRESHOLD: f32 = 0.8;

/// One region surviving fusion, not yet labeled or numbered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedRegion {
    pub kind: ElementKind,
    pub bounds: BoundingBox,
    /// Recognized text for text regions, `None` for icon regions.
    pub text: Option<String>,
    /// Detector score for icon regions, recognizer confidence for text.
    pub score: Option<f32>,
}

/// Merge text spans and icon detections into one ordered region set.
///
/// Text boxes are never rejected. Icon boxes are visited best-score-first
/// (stable for equal scores, so detector order breaks ties) and dropped
/// when they overlap any already-accepted box beyond `overlap_threshold`
/// (IoU), or when their intersection-over-smaller-area with an accepted
/// text box exceeds [`CONTAINMENT_THRESHOLD`]. The second rule also
/// removes detections that fully enclose a text box.
///
/// Deterministic and idempotent for identical inputs and threshold.
#[must_use]
pub fn fuse(
    text_spans: &[OcrSpan],
    detections: &[RawDetection],
    overlap_threshold: f32,
) -> Vec<FusedRegion> {
    let mut regions: Vec<FusedRegion> = text_spans
        .iter()
        .map(|span| FusedRegion {
            kind: ElementKind::TextBox,
            bounds: span.bounds,
            text: Some(span.text.clone()),
            score: span.confidence,
        })
        .collect();
    let text_count = regions.len();

    let mut ordered: Vec<&RawDetection> = detections.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for detection in ordered {
        if regions
            .iter()
            .any(|region| region.bounds.iou(&detection.bounds) > overlap_threshold)
        {
            debug!(
                "Icon box suppressed (IoU > {:.2} with accepted box, score {:.3})",
                overlap_threshold, detection.score
            );
            continue;
        }

        // Containment is only tested against text boxes: a detection that
        // bounds a recognized text region is a false positive, while nested
        // icon detections are already handled by the IoU rule.
        if regions[..text_count].iter().any(|region| {
            region.bounds.intersection_over_smaller(&detection.bounds) > CONTAINMENT_THRESHOLD
        }) {
            debug!(
                "Icon box suppressed (bounds a text region, score {:.3})",
                detection.score
            );
            continue;
        }

        regions.push(FusedRegion {
            kind: ElementKind::IconBox,
            bounds: detection.bounds,
            text: None,
            score: Some(detection.score),
        });
    }

    debug!(
        "Fusion kept {} text and {} icon regions ({} detections in)",
        text_count,
        regions.len() - text_count,
        detections.len()
    );

    regions
}
