//! Collaborator boundaries between the pipeline and the underlying models.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{OcrSpan, ParseError, RawDetection};

/// Per-call options for text recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRecognitionOptions {
    /// Drop spans whose reported confidence falls below this value. Spans
    /// from engines that report no score pass through unfiltered.
    pub confidence_threshold: f32,
    /// Merge adjacent lines into paragraph regions where the engine
    /// supports it.
    pub paragraph: bool,
}

impl Default for TextRecognitionOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.9,
            paragraph: false,
        }
    }
}

/// Per-call options for icon detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconDetectionOptions {
    /// Minimum detector confidence for a candidate box.
    pub confidence_threshold: f32,
    /// IoU above which a lower-scoring candidate is suppressed.
    pub overlap_threshold: f32,
    /// Side length of the square input the detector operates on.
    pub inference_size: u32,
}

impl Default for IconDetectionOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.05,
            overlap_threshold: 0.1,
            inference_size: 640,
        }
    }
}

/// A text detection/recognition engine.
///
/// Implementations normalize their native region representation (polygons
/// included) to axis-aligned boxes in source pixel space. A blank or
/// unreadable-but-decoded image yields an empty span list, not an error.
pub trait TextEngine: Send + Sync {
    fn recognize(
        &self,
        image: &RgbImage,
        options: &TextRecognitionOptions,
    ) -> Result<Vec<OcrSpan>, ParseError>;

    /// Short engine name for logs and error context.
    fn name(&self) -> &'static str;
}

/// An interactable-region detector.
///
/// Returns score-descending, NMS-unique boxes mapped back to source pixel
/// space. Zero detections is a valid result.
pub trait IconDetector: Send + Sync {
    fn detect(
        &self,
        image: &RgbImage,
        options: &IconDetectionOptions,
    ) -> Result<Vec<RawDetection>, ParseError>;
}

/// A captioning model for icon crops.
///
/// `caption_batch` is order-preserving and returns exactly one caption per
/// crop; a failure anywhere in the batch fails the whole call.
pub trait Captioner: Send + Sync {
    fn caption_batch(&self, crops: &[RgbImage]) -> Result<Vec<String>, ParseError>;
}
