//! Higher-accuracy two-stage OCR engine on ONNX Runtime.
//!
//! Stage one is a segmentation-style detection model producing a text
//! probability map; thresholding plus connected-component labelling turns
//! it into axis-aligned line boxes. Stage two crops each box and runs a CTC
//! recognition model, decoded greedily over a character dictionary loaded
//! from disk alongside the models.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array4;
use once_cell::sync::Lazy;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use screen_parse_common::{BoundingBox, OcrSpan, ParseError, TextEngine, TextRecognitionOptions};

use crate::OcrError;

/// Fallback character set when no dictionary file is configured.
static DEFAULT_CHARSET: Lazy<Vec<char>> = Lazy::new(|| {
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ \
     .,:;!?%&()+-*/='\"#@_"
        .chars()
        .collect()
});

/// Detection models expect input sides that are multiples of this stride.
const DETECTION_STRIDE: u32 = 32;

/// Configuration for the two-stage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxEngineConfig {
    /// Probability above which a map pixel counts as text.
    pub mask_threshold: f32,
    /// Mean in-region probability below which a candidate box is discarded.
    pub box_score_threshold: f32,
    /// Longest image side fed to the detection model.
    pub max_side: u32,
    /// Minimum candidate box side, in probability-map pixels.
    pub min_box_size: f32,
    /// Fractional expansion applied to each detected box; segmentation maps
    /// shrink the text area and this recovers the stroke margins.
    pub box_expansion: f32,
    /// Recognition input height.
    pub rec_height: u32,
    /// Recognition input width (crops are scaled and padded to this).
    pub rec_width: u32,
}

impl Default for OnnxEngineConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 0.3,
            box_score_threshold: 0.6,
            max_side: 960,
            min_box_size: 3.0,
            box_expansion: 0.15,
            rec_height: 48,
            rec_width: 320,
        }
    }
}

/// Two-stage detection + recognition engine.
///
/// Sessions are `Mutex`-guarded because `Session::run` takes `&mut self`.
pub struct OnnxTextEngine {
    detection: Mutex<Session>,
    recognition: Mutex<Session>,
    charset: Vec<char>,
    config: OnnxEngineConfig,
}

impl OnnxTextEngine {
    /// Load both models and the optional character dictionary.
    pub fn new<P: AsRef<Path>>(
        det_model: P,
        rec_model: P,
        charset_path: Option<P>,
        config: OnnxEngineConfig,
    ) -> Result<Self, OcrError> {
        let detection = load_session(det_model.as_ref())?;
        let recognition = load_session(rec_model.as_ref())?;

        let charset = match charset_path {
            Some(path) => load_charset(path.as_ref())?,
            None => DEFAULT_CHARSET.clone(),
        };
        debug!("Recognition charset holds {} symbols", charset.len());

        Ok(Self {
            detection: Mutex::new(detection),
            recognition: Mutex::new(recognition),
            charset,
            config,
        })
    }

    fn recognize_inner(
        &self,
        image: &RgbImage,
        options: &TextRecognitionOptions,
    ) -> Result<Vec<OcrSpan>, OcrError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::Recognition(format!(
                "image dimensions must be non-zero (got {width}x{height})"
            )));
        }

        // Boxes arrive line-level straight from the detector; the paragraph
        // flag has no effect for this engine.
        let boxes = self.detect_boxes(image)?;
        debug!("Detection model proposed {} text regions", boxes.len());

        let mut spans = Vec::with_capacity(boxes.len());
        for bounds in boxes {
            let (text, score) = self.recognize_box(image, &bounds)?;
            if text.is_empty() || score < options.confidence_threshold {
                continue;
            }
            spans.push(OcrSpan {
                bounds,
                text,
                confidence: Some(score),
            });
        }

        Ok(spans)
    }

    /// Run the detection model and map candidate boxes to source pixels.
    fn detect_boxes(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, OcrError> {
        let (src_width, src_height) = image.dimensions();

        let scale = (self.config.max_side as f32 / src_width.max(src_height) as f32).min(1.0);
        let target_w = round_to_stride((src_width as f32 * scale) as u32);
        let target_h = round_to_stride((src_height as f32 * scale) as u32);
        let resized = imageops::resize(
            image,
            target_w,
            target_h,
            imageops::FilterType::Triangle,
        );

        let input = normalize_imagenet(&resized);
        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let mut session = self
            .detection
            .lock()
            .map_err(|_| OcrError::Recognition("detection session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::Recognition(format!("failed to extract text map: {e}")))?;
        let dims = shape.as_ref();
        if dims.len() != 4 {
            return Err(OcrError::Recognition(format!(
                "expected 4D probability map, got {}D",
                dims.len()
            )));
        }
        let map_w = dims[3] as u32;
        let map_h = dims[2] as u32;

        let boxes = boxes_from_probability_map(data, map_w, map_h, &self.config);

        // Probability-map space back to source pixels.
        let sx = src_width as f32 / map_w as f32;
        let sy = src_height as f32 / map_h as f32;
        Ok(boxes
            .into_iter()
            .map(|b| {
                BoundingBox::new(
                    (b.x1 * sx).clamp(0.0, src_width as f32),
                    (b.y1 * sy).clamp(0.0, src_height as f32),
                    (b.x2 * sx).clamp(0.0, src_width as f32),
                    (b.y2 * sy).clamp(0.0, src_height as f32),
                )
            })
            .collect())
    }

    /// Crop one text box and run the recognition model over it.
    fn recognize_box(
        &self,
        image: &RgbImage,
        bounds: &BoundingBox,
    ) -> Result<(String, f32), OcrError> {
        let crop = crop_pixels(image, bounds);
        let (crop_w, crop_h) = crop.dimensions();

        let target_h = self.config.rec_height;
        let scaled_w = ((crop_w as f32 * target_h as f32 / crop_h as f32).ceil() as u32)
            .clamp(1, self.config.rec_width);
        let resized = imageops::resize(&crop, scaled_w, target_h, imageops::FilterType::Triangle);

        // Scale to [-1, 1]; the right-side padding stays at the mid level.
        let mut input = Array4::<f32>::zeros((
            1,
            3,
            target_h as usize,
            self.config.rec_width as usize,
        ));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] =
                    (f32::from(pixel[channel]) / 255.0 - 0.5) / 0.5;
            }
        }

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let mut session = self
            .recognition
            .lock()
            .map_err(|_| OcrError::Recognition("recognition session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::Recognition(format!("failed to extract logits: {e}")))?;
        let dims = shape.as_ref();
        if dims.len() != 3 {
            return Err(OcrError::Recognition(format!(
                "expected 3D recognition output, got {}D",
                dims.len()
            )));
        }

        let steps = dims[1] as usize;
        let classes = dims[2] as usize;
        Ok(ctc_greedy_decode(data, steps, classes, &self.charset))
    }
}

impl TextEngine for OnnxTextEngine {
    fn recognize(
        &self,
        image: &RgbImage,
        options: &TextRecognitionOptions,
    ) -> Result<Vec<OcrSpan>, ParseError> {
        Ok(self.recognize_inner(image, options)?)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

fn load_session(path: &Path) -> Result<Session, OcrError> {
    if !path.exists() {
        return Err(OcrError::ModelLoad(format!(
            "model file not found: {}",
            path.display()
        )));
    }

    debug!("Loading OCR model from {:?}", path);
    Session::builder()
        .map_err(OcrError::OnnxRuntime)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(OcrError::OnnxRuntime)?
        .commit_from_file(path)
        .map_err(|e| OcrError::ModelLoad(e.to_string()))
}

/// One symbol per line; index 0 of the recognition head is the CTC blank,
/// so the dictionary maps class `i + 1` to `charset[i]`.
fn load_charset(path: &Path) -> Result<Vec<char>, OcrError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        OcrError::ModelLoad(format!(
            "failed to read character dictionary {}: {e}",
            path.display()
        ))
    })?;

    let mut charset: Vec<char> = contents
        .lines()
        .filter_map(|line| line.chars().next())
        .collect();
    if charset.is_empty() {
        return Err(OcrError::ModelLoad(format!(
            "character dictionary {} is empty",
            path.display()
        )));
    }
    if !charset.contains(&' ') {
        charset.push(' ');
    }

    Ok(charset)
}

fn round_to_stride(value: u32) -> u32 {
    let rounded = (value as f32 / DETECTION_STRIDE as f32).round() as u32;
    rounded.max(1) * DETECTION_STRIDE
}

/// CHW float input with ImageNet channel statistics.
fn normalize_imagenet(image: &RgbImage) -> Array4<f32> {
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    let (width, height) = image.dimensions();
    let mut array = Array4::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for channel in 0..3 {
            let value = f32::from(pixel[channel]) / 255.0;
            array[[0, channel, y as usize, x as usize]] =
                (value - MEAN[channel]) / STD[channel];
        }
    }

    array
}

/// Threshold the probability map and turn connected components into
/// expanded, score-filtered boxes, top-to-bottom then left-to-right.
/// Coordinates stay in map space.
fn boxes_from_probability_map(
    probs: &[f32],
    width: u32,
    height: u32,
    config: &OnnxEngineConfig,
) -> Vec<BoundingBox> {
    let mask = GrayImage::from_fn(width, height, |x, y| {
        if probs[(y * width + x) as usize] > config.mask_threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    struct Region {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        sum: f32,
        count: u32,
    }

    let mut regions: HashMap<u32, Region> = HashMap::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel[0];
        if label == 0 {
            continue;
        }

        let p = probs[(y * width + x) as usize];
        let region = regions.entry(label).or_insert(Region {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum: 0.0,
            count: 0,
        });
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
        region.sum += p;
        region.count += 1;
    }

    let mut boxes = Vec::new();
    for region in regions.values() {
        let score = region.sum / region.count as f32;
        if score < config.box_score_threshold {
            continue;
        }

        let w = (region.max_x - region.min_x + 1) as f32;
        let h = (region.max_y - region.min_y + 1) as f32;
        if w < config.min_box_size || h < config.min_box_size {
            continue;
        }

        let dx = w * config.box_expansion;
        let dy = h * config.box_expansion;
        boxes.push(BoundingBox::new(
            region.min_x as f32 - dx,
            region.min_y as f32 - dy,
            (region.max_x + 1) as f32 + dx,
            (region.max_y + 1) as f32 + dy,
        ));
    }

    // HashMap order is arbitrary; reading order makes the output stable.
    boxes.sort_by(|a, b| {
        (a.y1, a.x1)
            .partial_cmp(&(b.y1, b.x1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    boxes
}

/// Greedy CTC decode: per-step argmax, collapse repeats, skip the blank at
/// class 0. The score is the mean probability of the emitted symbols.
fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    charset: &[char],
) -> (String, f32) {
    let mut text = String::new();
    let mut score_sum = 0.0f32;
    let mut emitted = 0u32;
    let mut previous = 0usize;

    for step in 0..steps {
        let row = &probs[step * classes..(step + 1) * classes];
        let (best, prob) = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, &p)| (idx, p))
            .unwrap_or((0, 0.0));

        if best != 0 && best != previous {
            if let Some(&symbol) = charset.get(best - 1) {
                text.push(symbol);
                score_sum += prob;
                emitted += 1;
            }
        }
        previous = best;
    }

    let score = if emitted > 0 {
        score_sum / emitted as f32
    } else {
        0.0
    };
    (text, score)
}

/// Crop an axis-aligned pixel region, rounded outward to whole pixels.
fn crop_pixels(image: &RgbImage, bounds: &BoundingBox) -> RgbImage {
    let (width, height) = image.dimensions();
    let x1 = (bounds.x1.floor() as u32).min(width.saturating_sub(1));
    let y1 = (bounds.y1.floor() as u32).min(height.saturating_sub(1));
    let x2 = (bounds.x2.ceil() as u32).clamp(x1 + 1, width);
    let y2 = (bounds.y2.ceil() as u32).clamp(y1 + 1, height);

    imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OnnxEngineConfig::default();
        assert_eq!(config.max_side, 960);
        assert_eq!(config.rec_height, 48);
        assert_eq!(config.rec_width, 320);
        assert!(config.mask_threshold < config.box_score_threshold);
    }

    #[test]
    fn test_round_to_stride() {
        assert_eq!(round_to_stride(0), 32);
        assert_eq!(round_to_stride(31), 32);
        assert_eq!(round_to_stride(640), 640);
        assert_eq!(round_to_stride(650), 640);
        assert_eq!(round_to_stride(660), 672);
    }

    #[test]
    fn test_boxes_from_probability_map_finds_separated_blobs() {
        let (width, height) = (64u32, 32u32);
        let mut probs = vec![0.0f32; (width * height) as usize];

        // Two well-separated high-probability rectangles.
        for y in 4..10 {
            for x in 4..20 {
                probs[(y * width + x) as usize] = 0.9;
            }
            for x in 30..50 {
                probs[(y * width + x) as usize] = 0.85;
            }
        }

        let config = OnnxEngineConfig {
            box_expansion: 0.0,
            ..OnnxEngineConfig::default()
        };
        let boxes = boxes_from_probability_map(&probs, width, height, &config);

        assert_eq!(boxes.len(), 2);
        // Reading order: leftmost blob first on the same row.
        assert!(boxes[0].x1 < boxes[1].x1);
        assert!((boxes[0].x1 - 4.0).abs() < 1e-3);
        assert!((boxes[0].x2 - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_boxes_from_probability_map_drops_weak_regions() {
        let (width, height) = (32u32, 32u32);
        let mut probs = vec![0.0f32; (width * height) as usize];
        for y in 4..12 {
            for x in 4..12 {
                // Above the mask threshold but below the score threshold.
                probs[(y * width + x) as usize] = 0.4;
            }
        }

        let boxes =
            boxes_from_probability_map(&probs, width, height, &OnnxEngineConfig::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_boxes_from_probability_map_drops_tiny_regions() {
        let (width, height) = (32u32, 32u32);
        let mut probs = vec![0.0f32; (width * height) as usize];
        probs[(5 * width + 5) as usize] = 0.9;
        probs[(5 * width + 6) as usize] = 0.9;

        let boxes =
            boxes_from_probability_map(&probs, width, height, &OnnxEngineConfig::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_ctc_decode_collapses_repeats_and_blanks() {
        let charset: Vec<char> = "ab".chars().collect();
        // Classes: 0 = blank, 1 = 'a', 2 = 'b'.
        // Steps: a a blank a b -> "aab"
        let probs = vec![
            0.1, 0.8, 0.1, // a
            0.1, 0.8, 0.1, // a (repeat, collapsed)
            0.9, 0.05, 0.05, // blank
            0.1, 0.7, 0.2, // a (new emission after blank)
            0.1, 0.2, 0.7, // b
        ];

        let (text, score) = ctc_greedy_decode(&probs, 5, 3, &charset);
        assert_eq!(text, "aab");
        assert!((score - (0.8 + 0.7 + 0.7) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_decode_all_blank_is_empty() {
        let charset: Vec<char> = "ab".chars().collect();
        let probs = vec![0.9, 0.05, 0.05, 0.9, 0.05, 0.05];

        let (text, score) = ctc_greedy_decode(&probs, 2, 3, &charset);
        assert!(text.is_empty());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_ctc_decode_ignores_out_of_charset_classes() {
        let charset: Vec<char> = "a".chars().collect();
        // Class 2 has no charset entry and is skipped.
        let probs = vec![0.1, 0.2, 0.7, 0.1, 0.8, 0.1];

        let (text, _) = ctc_greedy_decode(&probs, 2, 3, &charset);
        assert_eq!(text, "a");
    }

    #[test]
    fn test_default_charset_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for &c in DEFAULT_CHARSET.iter() {
            assert!(seen.insert(c), "duplicate charset symbol {c:?}");
        }
    }

    #[test]
    fn test_missing_model_is_a_load_error() {
        let result = OnnxTextEngine::new(
            "/nonexistent/det.onnx",
            "/nonexistent/rec.onnx",
            None,
            OnnxEngineConfig::default(),
        );
        assert!(matches!(result, Err(OcrError::ModelLoad(_))));
    }

    #[test]
    fn test_missing_charset_is_a_load_error() {
        let result = load_charset(Path::new("/nonexistent/dict.txt"));
        assert!(matches!(result, Err(OcrError::ModelLoad(_))));
    }

    #[test]
    fn test_crop_pixels_rounds_outward() {
        let image = RgbImage::new(100, 100);
        let crop = crop_pixels(&image, &BoundingBox::new(10.4, 10.6, 20.2, 19.5));
        assert_eq!(crop.dimensions(), (11, 10));
    }
}
