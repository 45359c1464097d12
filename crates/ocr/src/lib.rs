//! Text region extraction over interchangeable OCR engines
//!
//! Turns a screenshot into normalized `(box, text)` spans. Two engines sit
//! behind the [`TextEngine`] boundary:
//! - [`TesseractEngine`]: the bundled engine, word- or paragraph-level
//!   component boxes with per-region confidence.
//! - [`OnnxTextEngine`]: a higher-accuracy two-stage engine (segmentation
//!   detector + CTC recognizer) running on ONNX Runtime.
//!
//! The extractor selects the engine per call, applies the confidence filter
//! uniformly, and enforces the optional region cap. All boxes come back
//! axis-aligned in source pixel space regardless of the engine's native
//! region representation.

mod onnx;
mod tesseract;

pub use onnx::{OnnxEngineConfig, OnnxTextEngine};
pub use tesseract::{TesseractConfig, TesseractEngine};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use screen_parse_common::{OcrSpan, ParseError, TextEngine, TextRecognitionOptions};

/// Errors from the text extraction stage.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Failed to initialize OCR engine: {0}")]
    Init(String),

    #[error("Failed to load recognition model: {0}")]
    ModelLoad(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::Error),
}

impl From<OcrError> for ParseError {
    fn from(err: OcrError) -> Self {
        ParseError::Recognition(err.to_string())
    }
}

/// Options for one extraction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextExtractionOptions {
    /// Options forwarded to the engine.
    pub recognition: TextRecognitionOptions,
    /// Pick the higher-accuracy ONNX engine over the bundled one.
    pub use_alternate_engine: bool,
    /// Hard cap on the number of returned regions.
    pub max_regions: Option<usize>,
}

impl Default for TextExtractionOptions {
    fn default() -> Self {
        Self {
            recognition: TextRecognitionOptions::default(),
            use_alternate_engine: true,
            max_regions: None,
        }
    }
}

/// Extracts text regions through one of two interchangeable engines.
pub struct TextRegionExtractor {
    primary: Box<dyn TextEngine>,
    alternate: Option<Box<dyn TextEngine>>,
}

impl TextRegionExtractor {
    #[must_use]
    pub fn new(primary: Box<dyn TextEngine>, alternate: Option<Box<dyn TextEngine>>) -> Self {
        Self { primary, alternate }
    }

    /// Run the selected engine and normalize its output.
    ///
    /// Requesting the alternate engine when it is not loaded fails with
    /// [`ParseError::ModelUnavailable`]. A blank image yields an empty span
    /// list, not an error.
    pub fn extract(
        &self,
        image: &RgbImage,
        options: &TextExtractionOptions,
    ) -> Result<Vec<OcrSpan>, ParseError> {
        let engine: &dyn TextEngine = if options.use_alternate_engine {
            self.alternate.as_deref().ok_or_else(|| {
                ParseError::ModelUnavailable("alternate OCR engine is not loaded".into())
            })?
        } else {
            self.primary.as_ref()
        };

        let mut spans = engine.recognize(image, &options.recognition)?;

        spans.retain(|span| {
            span.confidence
                .map_or(true, |c| c >= options.recognition.confidence_threshold)
        });
        if let Some(cap) = options.max_regions {
            spans.truncate(cap);
        }

        debug!("Extracted {} text spans via {}", spans.len(), engine.name());
        Ok(spans)
    }
}
