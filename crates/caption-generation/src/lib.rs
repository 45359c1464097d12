//! Icon captioning via an encoder-decoder vision-language model
//!
//! Produces short natural-language descriptions for icon crops using a
//! captioning model exported to ONNX with its tokenizer vocabulary. Crops
//! are resized to the model's square input, normalized, and decoded
//! greedily token by token until the end-of-sequence marker.
//!
//! # Example
//! ```no_run
//! use image::open;
//! use screen_parse_caption_generation::{CaptionConfig, CaptionGenerator};
//!
//! # fn main() -> anyhow::Result<()> {
//! let generator = CaptionGenerator::new(
//!     "models/caption-generation/captioner.onnx",
//!     "models/caption-generation/tokenizer.json",
//!     CaptionConfig::default(),
//! )?;
//!
//! let crop = open("icon.png")?.to_rgb8();
//! let caption = generator.caption(&crop)?;
//! println!("{caption}");
//! # Ok(())
//! # }
//! ```

mod generation;

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use screen_parse_common::ParseError;

/// Configuration for caption generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Square input side length expected by the vision encoder.
    pub input_size: u32,
    /// Maximum caption length in tokens.
    pub max_length: usize,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            input_size: 384,
            max_length: 50,
        }
    }
}

/// Errors from the captioning stage.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("Failed to load caption model: {0}")]
    ModelLoad(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::Error),
}

impl From<CaptionError> for ParseError {
    fn from(err: CaptionError) -> Self {
        ParseError::Captioning(err.to_string())
    }
}

/// Caption generator shared read-only across pipeline runs.
///
/// The inner generator sits behind a `Mutex` because `Session::run` takes
/// `&mut self`; callers see a `&self` API.
pub struct CaptionGenerator {
    generator: Mutex<generation::TextGenerator>,
    config: CaptionConfig,
}

impl CaptionGenerator {
    /// Load the caption model and its tokenizer from disk.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        tokenizer_path: P,
        config: CaptionConfig,
    ) -> Result<Self, CaptionError> {
        info!(
            "Loading caption model from {:?} with tokenizer {:?}",
            model_path.as_ref(),
            tokenizer_path.as_ref()
        );
        let generator = generation::TextGenerator::new(model_path, tokenizer_path)?;

        Ok(Self {
            generator: Mutex::new(generator),
            config,
        })
    }

    /// Generate a caption for a single crop.
    pub fn caption(&self, crop: &RgbImage) -> Result<String, CaptionError> {
        let pixel_values = self.preprocess(crop);

        let mut generator = self
            .generator
            .lock()
            .map_err(|_| CaptionError::Inference("caption session lock poisoned".into()))?;
        generator.generate(&pixel_values, self.config.max_length)
    }

    /// Generate captions for a batch of crops, order-preserving and with the
    /// same cardinality as the input.
    pub fn caption_batch(&self, crops: &[RgbImage]) -> Result<Vec<String>, CaptionError> {
        debug!("Captioning batch of {} crops", crops.len());
        crops.iter().map(|crop| self.caption(crop)).collect()
    }

    /// Resize to the encoder's square input and normalize with the ImageNet
    /// channel statistics the model was trained with.
    fn preprocess(&self, crop: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let resized = if crop.dimensions() == (size, size) {
            crop.clone()
        } else {
            image::imageops::resize(crop, size, size, image::imageops::FilterType::Triangle)
        };

        const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
        const STD: [f32; 3] = [0.229, 0.224, 0.225];

        let size = size as usize;
        let mut array = Array4::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / 255.0;
                array[[0, channel, y, x]] = (value - MEAN[channel]) / STD[channel];
            }
        }

        array
    }
}

impl screen_parse_common::Captioner for CaptionGenerator {
    fn caption_batch(&self, crops: &[RgbImage]) -> Result<Vec<String>, ParseError> {
        Ok(CaptionGenerator::caption_batch(self, crops)?)
    }
}
