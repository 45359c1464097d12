//! Model registry - the process-wide singletons behind the pipeline.

use std::path::PathBuf;

use tracing::info;

use screen_parse_caption_generation::{CaptionConfig, CaptionGenerator};
use screen_parse_common::{Captioner, IconDetector, ParseError, TextEngine};
use screen_parse_icon_detection::IconRegionDetector;
use screen_parse_ocr::{
    OnnxEngineConfig, OnnxTextEngine, TesseractConfig, TesseractEngine, TextRegionExtractor,
};
use screen_parse_overlay::OverlayRenderer;

/// Filesystem locations of the model artifacts loaded at startup.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub icon_model: PathBuf,
    pub caption_model: PathBuf,
    pub caption_tokenizer: PathBuf,
    /// Detection model of the alternate OCR engine; the engine is skipped
    /// when either of its models is absent.
    pub ocr_detection_model: Option<PathBuf>,
    pub ocr_recognition_model: Option<PathBuf>,
    pub ocr_charset: Option<PathBuf>,
    /// Font for overlay id labels; boxes render without labels otherwise.
    pub overlay_font: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            icon_model: PathBuf::from("models/icon-detection/interactables.onnx"),
            caption_model: PathBuf::from("models/caption-generation/captioner.onnx"),
            caption_tokenizer: PathBuf::from("models/caption-generation/tokenizer.json"),
            ocr_detection_model: Some(PathBuf::from("models/ocr/detection.onnx")),
            ocr_recognition_model: Some(PathBuf::from("models/ocr/recognition.onnx")),
            ocr_charset: Some(PathBuf::from("models/ocr/charset.txt")),
            overlay_font: None,
        }
    }
}

impl RegistryConfig {
    /// Build paths from the environment, falling back to the defaults.
    ///
    /// Recognized variables: `ICON_MODEL_PATH`, `CAPTION_MODEL_PATH`,
    /// `CAPTION_TOKENIZER_PATH`, `OCR_DET_MODEL_PATH`, `OCR_REC_MODEL_PATH`,
    /// `OCR_CHARSET_PATH`, `OVERLAY_FONT_PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let path_var = |name: &str| std::env::var(name).ok().map(PathBuf::from);

        Self {
            icon_model: path_var("ICON_MODEL_PATH").unwrap_or(defaults.icon_model),
            caption_model: path_var("CAPTION_MODEL_PATH").unwrap_or(defaults.caption_model),
            caption_tokenizer: path_var("CAPTION_TOKENIZER_PATH")
                .unwrap_or(defaults.caption_tokenizer),
            ocr_detection_model: path_var("OCR_DET_MODEL_PATH")
                .or(defaults.ocr_detection_model),
            ocr_recognition_model: path_var("OCR_REC_MODEL_PATH")
                .or(defaults.ocr_recognition_model),
            ocr_charset: path_var("OCR_CHARSET_PATH").or(defaults.ocr_charset),
            overlay_font: path_var("OVERLAY_FONT_PATH"),
        }
    }
}

/// The loaded model set, constructed once at process start and shared
/// read-only across requests.
///
/// Collaborators are trait objects so the pipeline and its tests never
/// reach for implicit global state.
pub struct ModelRegistry {
    text_extractor: TextRegionExtractor,
    icon_detector: Box<dyn IconDetector>,
    captioner: Box<dyn Captioner>,
    overlay_renderer: OverlayRenderer,
}

impl ModelRegistry {
    /// Load every model named by the config, failing fast on the first
    /// artifact that cannot be loaded.
    pub fn load(config: &RegistryConfig) -> Result<Self, ParseError> {
        info!("Loading model registry");

        let primary = TesseractEngine::new(TesseractConfig::default())?;
        let alternate = match (&config.ocr_detection_model, &config.ocr_recognition_model) {
            (Some(det), Some(rec)) => {
                let engine = OnnxTextEngine::new(
                    det,
                    rec,
                    config.ocr_charset.as_ref(),
                    OnnxEngineConfig::default(),
                )?;
                Some(Box::new(engine) as Box<dyn TextEngine>)
            }
            _ => {
                info!("Alternate OCR engine not configured; bundled engine only");
                None
            }
        };
        let text_extractor = TextRegionExtractor::new(Box::new(primary), alternate);

        let icon_detector = Box::new(IconRegionDetector::new(&config.icon_model)?);
        let captioner = Box::new(CaptionGenerator::new(
            &config.caption_model,
            &config.caption_tokenizer,
            CaptionConfig::default(),
        )?);

        let overlay_renderer = match &config.overlay_font {
            Some(path) => OverlayRenderer::new(path)?,
            None => OverlayRenderer::without_labels(),
        };

        info!("Model registry loaded");
        Ok(Self {
            text_extractor,
            icon_detector,
            captioner,
            overlay_renderer,
        })
    }

    /// Assemble a registry from pre-built collaborators.
    #[must_use]
    pub fn from_parts(
        text_extractor: TextRegionExtractor,
        icon_detector: Box<dyn IconDetector>,
        captioner: Box<dyn Captioner>,
        overlay_renderer: OverlayRenderer,
    ) -> Self {
        Self {
            text_extractor,
            icon_detector,
            captioner,
            overlay_renderer,
        }
    }

    #[must_use]
    pub fn text_extractor(&self) -> &TextRegionExtractor {
        &self.text_extractor
    }

    #[must_use]
    pub fn icon_detector(&self) -> &dyn IconDetector {
        self.icon_detector.as_ref()
    }

    #[must_use]
    pub fn captioner(&self) -> &dyn Captioner {
        self.captioner.as_ref()
    }

    #[must_use]
    pub fn overlay_renderer(&self) -> &OverlayRenderer {
        &self.overlay_renderer
    }
}
