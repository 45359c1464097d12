//! Pipeline orchestration
//!
//! Sequences text extraction, icon detection, fusion, labeling, and
//! overlay rendering over one decoded screenshot and assembles the final
//! element list. Fusion and labeling always run in source pixel space;
//! ratio conversion happens once, immediately before assembly, so the
//! overlap and containment thresholds never drift with image size.
//!
//! One call processes one image end-to-end on the calling thread. The
//! models live in a [`ModelRegistry`] constructed once at process start
//! and shared read-only across concurrent runs.

mod registry;

pub use registry::{ModelRegistry, RegistryConfig};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use screen_parse_common::{
    IconDetectionOptions, ParseError, ParseResult, TextRecognitionOptions,
};
use screen_parse_fusion::{fuse, label_elements};
use screen_parse_ocr::TextExtractionOptions;

/// Configuration for one parse run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Icon detector confidence threshold.
    pub box_threshold: f32,
    /// Overlap threshold shared by detector NMS and fusion.
    pub iou_threshold: f32,
    /// Use the higher-accuracy ONNX OCR engine instead of the bundled one.
    pub use_onnx_ocr: bool,
    /// Square side length for detector inference.
    pub inference_size: u32,
    /// Return boxes as `[0, 1]` ratios of the image dimensions.
    pub output_ratio_coordinates: bool,
    /// Render the annotated overlay image.
    pub draw_overlay: bool,
    /// OCR confidence threshold.
    pub ocr_confidence_threshold: f32,
    /// Ask the OCR engine for paragraph-level regions.
    pub ocr_paragraph: bool,
    /// Captioning batch size; `None` submits all crops in one batch.
    pub caption_batch_size: Option<usize>,
    /// Cap on the number of text regions taken from the extractor.
    pub max_text_regions: Option<usize>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            box_threshold: 0.05,
            iou_threshold: 0.1,
            use_onnx_ocr: true,
            inference_size: 640,
            output_ratio_coordinates: true,
            draw_overlay: false,
            ocr_confidence_threshold: 0.9,
            ocr_paragraph: false,
            caption_batch_size: None,
            max_text_regions: None,
        }
    }
}

impl ParseConfig {
    /// Reject out-of-range thresholds and degenerate sizes.
    pub fn validate(&self) -> Result<(), ParseError> {
        check_unit("box_threshold", self.box_threshold)?;
        check_unit("iou_threshold", self.iou_threshold)?;
        check_unit("ocr_confidence_threshold", self.ocr_confidence_threshold)?;

        if self.inference_size == 0 {
            return Err(ParseError::Configuration(
                "inference_size must be positive".into(),
            ));
        }
        if self.caption_batch_size == Some(0) {
            return Err(ParseError::Configuration(
                "caption_batch_size must be positive".into(),
            ));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ParseError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ParseError::Configuration(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

/// Run the full pipeline over one decoded screenshot.
///
/// Collaborator errors propagate unchanged; there is no partial output. A
/// screenshot with no text and no icons is a success with an empty result.
pub fn parse_image(
    registry: &ModelRegistry,
    image: &RgbImage,
    config: &ParseConfig,
) -> Result<ParseResult, ParseError> {
    config.validate()?;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ParseError::Decode("image has zero area".into()));
    }

    let text_options = TextExtractionOptions {
        recognition: TextRecognitionOptions {
            confidence_threshold: config.ocr_confidence_threshold,
            paragraph: config.ocr_paragraph,
        },
        use_alternate_engine: config.use_onnx_ocr,
        max_regions: config.max_text_regions,
    };
    let text_spans = registry.text_extractor().extract(image, &text_options)?;
    debug!("Text extraction produced {} spans", text_spans.len());

    let detection_options = IconDetectionOptions {
        confidence_threshold: config.box_threshold,
        overlap_threshold: config.iou_threshold,
        inference_size: config.inference_size,
    };
    let detections = registry.icon_detector().detect(image, &detection_options)?;
    debug!("Icon detection produced {} boxes", detections.len());

    let fused = fuse(&text_spans, &detections, config.iou_threshold);
    let mut elements = label_elements(
        fused,
        image,
        registry.captioner(),
        config.caption_batch_size,
    )?;

    // Overlay drawing wants pixel-space boxes, so it runs before any
    // coordinate conversion.
    let overlay = config
        .draw_overlay
        .then(|| registry.overlay_renderer().render(image, &elements));

    if config.output_ratio_coordinates {
        for element in &mut elements {
            element.bounds = element.bounds.to_ratio(width, height);
        }
    }

    info!(
        "Parsed {} elements from {}x{} image",
        elements.len(),
        width,
        height
    );
    Ok(ParseResult::new(elements, overlay))
}
