//! Interactable-region detection via ONNX Runtime
//!
//! Wraps a single-class YOLO-style detection model trained to find
//! clickable regions (icons, buttons, controls) in screenshots. The
//! detector resizes the screenshot to a square inference input, filters
//! candidates by confidence, suppresses duplicates with NMS, and maps the
//! surviving boxes back to source pixel space.
//!
//! # Example
//! ```no_run
//! use image::open;
//! use screen_parse_common::IconDetectionOptions;
//! use screen_parse_icon_detection::IconRegionDetector;
//!
//! # fn main() -> anyhow::Result<()> {
//! let detector = IconRegionDetector::new("models/icon-detection/interactables.onnx")?;
//!
//! let img = open("screenshot.png")?.to_rgb8();
//! let detections = detector.detect(&img, &IconDetectionOptions::default())?;
//!
//! for detection in detections {
//!     println!("{:?} score {:.2}", detection.bounds, detection.score);
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, info};

use screen_parse_common::{BoundingBox, IconDetectionOptions, ParseError, RawDetection};

/// Errors from the detection stage.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load detection model: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::Error),
}

impl From<DetectionError> for ParseError {
    fn from(err: DetectionError) -> Self {
        ParseError::Detection(err.to_string())
    }
}

/// Detector for interactable screen regions.
///
/// The session is loaded once and shared read-only; the `Mutex` exists
/// because `Session::run` takes `&mut self`, serializing inference calls.
pub struct IconRegionDetector {
    session: Mutex<Session>,
}

impl IconRegionDetector {
    /// Load the detection model from an ONNX file on disk.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, DetectionError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectionError::ModelLoad(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        info!("Loading interactable-region model from {:?}", model_path);
        let session = Session::builder()
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;
        info!("Interactable-region model loaded");

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Detect interactable regions, returning score-descending unique boxes
    /// in source pixel space. Zero detections is a valid result.
    pub fn detect(
        &self,
        image: &RgbImage,
        options: &IconDetectionOptions,
    ) -> Result<Vec<RawDetection>, DetectionError> {
        let (src_width, src_height) = image.dimensions();
        if src_width == 0 || src_height == 0 {
            return Err(DetectionError::InvalidInput(format!(
                "image dimensions must be non-zero (got {src_width}x{src_height})"
            )));
        }

        debug!(
            "Detecting interactable regions on {}x{} image at inference size {}",
            src_width, src_height, options.inference_size
        );

        let input = preprocess(image, options.inference_size);
        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Inference("detector session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("failed to extract tensor: {e}")))?;

        let dims = shape.as_ref();
        if dims.len() != 3 {
            return Err(DetectionError::Inference(format!(
                "expected 3D output tensor, got {}D",
                dims.len()
            )));
        }
        let num_features = dims[1] as usize;
        let num_anchors = dims[2] as usize;
        if num_features < 5 {
            return Err(DetectionError::Inference(format!(
                "expected at least 5 features per anchor, got {num_features}"
            )));
        }

        // Box coordinates come back in inference space; scale factors bring
        // them home to source pixels.
        let scale_x = src_width as f32 / options.inference_size as f32;
        let scale_y = src_height as f32 / options.inference_size as f32;

        let candidates = decode_anchors(
            data,
            num_features,
            num_anchors,
            options.confidence_threshold,
            scale_x,
            scale_y,
            src_width,
            src_height,
        );
        debug!("Candidates before NMS: {}", candidates.len());

        let detections = apply_nms(candidates, options.overlap_threshold);
        debug!("Detections after NMS: {}", detections.len());

        Ok(detections)
    }
}

impl screen_parse_common::IconDetector for IconRegionDetector {
    fn detect(
        &self,
        image: &RgbImage,
        options: &IconDetectionOptions,
    ) -> Result<Vec<RawDetection>, ParseError> {
        Ok(IconRegionDetector::detect(self, image, options)?)
    }
}

/// Resize to a square inference input and convert to normalized CHW.
fn preprocess(image: &RgbImage, inference_size: u32) -> Array<f32, ndarray::Dim<[usize; 4]>> {
    let resized = image::imageops::resize(
        image,
        inference_size,
        inference_size,
        image::imageops::FilterType::Triangle,
    );

    let size = inference_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
        input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
        input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
    }

    input
}

/// Decode the raw `[1, 4 + classes, anchors]` prediction tensor.
///
/// Data layout is feature-major: anchor `i`'s feature `f` lives at
/// `data[f * num_anchors + i]`. The first four features are a center-format
/// box; the rest are per-class probabilities (a single class for the
/// interactable model, but the maximum is taken so multi-class exports
/// decode the same way).
#[allow(clippy::too_many_arguments)]
fn decode_anchors(
    data: &[f32],
    num_features: usize,
    num_anchors: usize,
    confidence_threshold: f32,
    scale_x: f32,
    scale_y: f32,
    src_width: u32,
    src_height: u32,
) -> Vec<RawDetection> {
    let mut candidates = Vec::new();

    for anchor_idx in 0..num_anchors {
        let feature = |f: usize| data[f * num_anchors + anchor_idx];

        let score = (4..num_features)
            .map(feature)
            .fold(0.0f32, f32::max);
        if score < confidence_threshold {
            continue;
        }

        let x_center = feature(0);
        let y_center = feature(1);
        let width = feature(2);
        let height = feature(3);
        if width <= 0.0 || height <= 0.0 {
            continue;
        }

        let bounds = BoundingBox::new(
            ((x_center - width / 2.0) * scale_x).clamp(0.0, src_width as f32),
            ((y_center - height / 2.0) * scale_y).clamp(0.0, src_height as f32),
            ((x_center + width / 2.0) * scale_x).clamp(0.0, src_width as f32),
            ((y_center + height / 2.0) * scale_y).clamp(0.0, src_height as f32),
        );
        if bounds.area() <= 0.0 {
            continue;
        }

        candidates.push(RawDetection { bounds, score });
    }

    candidates
}

/// Greedy non-maximum suppression; keeps score-descending unique boxes.
fn apply_nms(mut candidates: Vec<RawDetection>, overlap_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bounds.iou(&candidate.bounds) <= overlap_threshold)
        {
            kept.push(candidate);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> RawDetection {
        RawDetection {
            bounds: BoundingBox::new(x1, y1, x2, y2),
            score,
        }
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let image = RgbImage::from_pixel(100, 60, image::Rgb([255, 128, 0]));
        let input = preprocess(&image, 64);

        assert_eq!(input.shape(), &[1, 3, 64, 64]);
        assert!((input[[0, 0, 10, 10]] - 1.0).abs() < 1e-6);
        assert!((input[[0, 2, 10, 10]]).abs() < 1e-6);
    }

    #[test]
    fn test_decode_anchors_scales_to_source_pixels() {
        // One anchor, one class. Center-format box (320, 160, 64, 32) in a
        // 640-square inference space, source image 1280x320.
        let num_anchors = 1;
        let data = vec![320.0, 160.0, 64.0, 32.0, 0.8];

        let detections = decode_anchors(&data, 5, num_anchors, 0.5, 2.0, 0.5, 1280, 320);

        assert_eq!(detections.len(), 1);
        let bounds = detections[0].bounds;
        assert!((bounds.x1 - 576.0).abs() < 1e-3);
        assert!((bounds.y1 - 72.0).abs() < 1e-3);
        assert!((bounds.x2 - 704.0).abs() < 1e-3);
        assert!((bounds.y2 - 88.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_anchors_filters_by_confidence() {
        // Two anchors in feature-major layout: scores 0.9 and 0.2.
        let data = vec![
            100.0, 100.0, // x_center
            100.0, 100.0, // y_center
            20.0, 20.0, // width
            20.0, 20.0, // height
            0.9, 0.2, // class score
        ];

        let detections = decode_anchors(&data, 5, 2, 0.5, 1.0, 1.0, 640, 640);
        assert_eq!(detections.len(), 1);
        assert!((detections[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_anchors_clamps_to_image() {
        // Box hanging off the left edge gets clamped at zero.
        let data = vec![5.0, 5.0, 40.0, 40.0, 0.9];

        let detections = decode_anchors(&data, 5, 1, 0.5, 1.0, 1.0, 640, 640);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bounds.x1, 0.0);
        assert_eq!(detections[0].bounds.y1, 0.0);
    }

    #[test]
    fn test_nms_drops_overlapping_lower_score() {
        let candidates = vec![
            detection(0.0, 0.0, 50.0, 50.0, 0.7),
            detection(5.0, 5.0, 48.0, 48.0, 0.9),
        ];

        let kept = apply_nms(candidates, 0.3);

        assert_eq!(kept.len(), 1);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_output_is_score_descending() {
        let candidates = vec![
            detection(0.0, 0.0, 10.0, 10.0, 0.3),
            detection(100.0, 0.0, 110.0, 10.0, 0.9),
            detection(200.0, 0.0, 210.0, 10.0, 0.6),
        ];

        let kept = apply_nms(candidates, 0.5);

        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.6, 0.3]);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let candidates = vec![
            detection(0.0, 0.0, 10.0, 10.0, 0.9),
            detection(20.0, 20.0, 30.0, 30.0, 0.8),
        ];

        assert_eq!(apply_nms(candidates, 0.1).len(), 2);
    }

    #[test]
    fn test_missing_model_file_is_a_load_error() {
        let result = IconRegionDetector::new("/nonexistent/interactables.onnx");
        assert!(matches!(result, Err(DetectionError::ModelLoad(_))));
    }
}
