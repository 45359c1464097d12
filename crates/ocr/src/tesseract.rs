//! Bundled OCR engine backed by Tesseract.

use image::RgbImage;
use leptess::{LepTess, Variable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use screen_parse_common::{BoundingBox, OcrSpan, ParseError, TextEngine, TextRecognitionOptions};

use crate::OcrError;

/// Configuration for the Tesseract engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesseractConfig {
    /// Tesseract language codes (e.g., "eng", "eng+fra").
    pub language: String,
    /// Page segmentation mode (Tesseract PSM).
    pub page_segmentation_mode: u32,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            page_segmentation_mode: 3, // fully automatic
        }
    }
}

/// Word- or paragraph-level OCR through Tesseract.
///
/// `LepTess` handles are not shareable across threads, so construction only
/// verifies the language data is installed and each call creates a fresh
/// handle.
pub struct TesseractEngine {
    config: TesseractConfig,
}

impl TesseractEngine {
    pub fn new(config: TesseractConfig) -> Result<Self, OcrError> {
        let _probe = LepTess::new(None, &config.language).map_err(|e| {
            OcrError::Init(format!(
                "failed to initialize Tesseract with language '{}': {e}. \
                 Make sure the language data is installed",
                config.language
            ))
        })?;

        Ok(Self { config })
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

        let mut lt = LepTess::new(None, &self.config.language)
            .map_err(|e| OcrError::Init(e.to_string()))?;
        lt.set_variable(
            Variable::TesseditPagesegMode,
            &self.config.page_segmentation_mode.to_string(),
        )
        .map_err(|e| OcrError::Init(format!("failed to set PSM: {e}")))?;

        // leptess wants encoded bytes; hand it an in-memory PNG.
        let mut png = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(format!("failed to encode image: {e}")))?;
        lt.set_image_from_mem(png.get_ref())
            .map_err(|e| OcrError::Recognition(format!("failed to set image: {e}")))?;

        let level = if options.paragraph {
            leptess::capi::TessPageIteratorLevel_RIL_PARA
        } else {
            leptess::capi::TessPageIteratorLevel_RIL_WORD
        };

        // No component boxes means a blank image, which is an empty result.
        let boxes = match lt.get_component_boxes(level, true) {
            Some(boxes) => boxes,
            None => return Ok(Vec::new()),
        };

        let mut spans = Vec::new();
        for component in &boxes {
            let geometry = component.get_geometry();

            lt.set_rectangle(geometry.x, geometry.y, geometry.w, geometry.h);
            let text = lt.get_utf8_text().unwrap_or_default().trim().to_string();
            if text.is_empty() {
                continue;
            }

            let confidence = lt.mean_text_conf() as f32 / 100.0;
            if confidence < options.confidence_threshold {
                continue;
            }

            debug!(
                "Tesseract region '{}' at ({}, {}) {}x{} conf {:.2}",
                text, geometry.x, geometry.y, geometry.w, geometry.h, confidence
            );

            spans.push(OcrSpan {
                bounds: BoundingBox::new(
                    geometry.x as f32,
                    geometry.y as f32,
                    (geometry.x + geometry.w) as f32,
                    (geometry.y + geometry.h) as f32,
                ),
                text,
                confidence: Some(confidence),
            });
        }

        Ok(spans)
    }
}

impl TextEngine for TesseractEngine {
    fn recognize(
        &self,
        image: &RgbImage,
        options: &TextRecognitionOptions,
    ) -> Result<Vec<OcrSpan>, ParseError> {
        Ok(self.recognize_inner(image, options)?)
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_config_default() {
        let config = TesseractConfig::default();
        assert_eq!(config.language, "eng");
        assert_eq!(config.page_segmentation_mode, 3);
    }

    #[test]
    fn test_invalid_language_fails_init() {
        let config = TesseractConfig {
            language: "no_such_lang_xyz".to_string(),
            ..TesseractConfig::default()
        };
        assert!(TesseractEngine::new(config).is_err());
    }

    #[test]
    fn test_blank_image_yields_no_spans() {
        // Requires installed Tesseract language data; skipped otherwise.
        let Ok(engine) = TesseractEngine::new(TesseractConfig::default()) else {
            return;
        };

        let blank = RgbImage::from_pixel(120, 80, Rgb([255, 255, 255]));
        let spans = engine
            .recognize_inner(&blank, &TextRecognitionOptions::default())
            .unwrap();
        assert!(spans.is_empty());
    }
}
