//! Greedy autoregressive decoding for the caption model.

use std::path::Path;

use ndarray::{Array2, Array4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::CaptionError;

/// Tokenizer plus decoder session with the special-token ids resolved.
pub(crate) struct TextGenerator {
    tokenizer: Tokenizer,
    session: Session,
    bos_token_id: u32,
    eos_token_id: u32,
}

impl TextGenerator {
    pub(crate) fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
    ) -> Result<Self, CaptionError> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();
        if !model_path.exists() {
            return Err(CaptionError::ModelLoad(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| CaptionError::Tokenizer(format!("failed to load tokenizer: {e}")))?;

        let session = Session::builder()
            .map_err(CaptionError::OnnxRuntime)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(CaptionError::OnnxRuntime)?
            .commit_from_file(model_path)
            .map_err(|e| CaptionError::ModelLoad(e.to_string()))?;

        // BERT-style WordPiece special tokens; the conventional ids are the
        // fallback for vocabularies that rename them.
        let bos_token_id = tokenizer.token_to_id("[CLS]").unwrap_or(101);
        let eos_token_id = tokenizer.token_to_id("[SEP]").unwrap_or(102);
        debug!("Special tokens: BOS={}, EOS={}", bos_token_id, eos_token_id);

        Ok(Self {
            tokenizer,
            session,
            bos_token_id,
            eos_token_id,
        })
    }

    /// Greedy decode: feed the growing token sequence back through the
    /// model, taking the argmax logit each step, until EOS or `max_length`.
    pub(crate) fn generate(
        &mut self,
        pixel_values: &Array4<f32>,
        max_length: usize,
    ) -> Result<String, CaptionError> {
        let mut token_ids = vec![i64::from(self.bos_token_id)];

        for _ in 0..max_length {
            let next = self.next_token(pixel_values, &token_ids)?;
            if next == i64::from(self.eos_token_id) {
                break;
            }
            token_ids.push(next);
        }

        let generated: Vec<u32> = token_ids.iter().skip(1).map(|&id| id as u32).collect();
        let caption = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| CaptionError::InvalidOutput(format!("failed to decode tokens: {e}")))?;

        debug!("Generated caption: '{}'", caption);
        Ok(caption)
    }

    fn next_token(
        &mut self,
        pixel_values: &Array4<f32>,
        token_ids: &[i64],
    ) -> Result<i64, CaptionError> {
        let seq_len = token_ids.len();
        let input_ids = Array2::from_shape_vec((1, seq_len), token_ids.to_vec())
            .map_err(|e| CaptionError::InvalidOutput(format!("failed to shape input_ids: {e}")))?;
        let attention_mask = Array2::<i64>::ones((1, seq_len));

        let pixel_values_tensor = Value::from_array(pixel_values.clone())?;
        let input_ids_tensor = Value::from_array(input_ids)?;
        let attention_mask_tensor = Value::from_array(attention_mask)?;

        let outputs = self.session.run(ort::inputs![
            "pixel_values" => pixel_values_tensor,
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
        ])?;

        let (shape, data) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| CaptionError::InvalidOutput(format!("failed to extract logits: {e}")))?;

        let dims = shape.as_ref();
        if dims.len() != 3 {
            return Err(CaptionError::InvalidOutput(format!(
                "unexpected logits shape: {dims:?}"
            )));
        }
        let vocab_size = dims[2] as usize;

        // Argmax over the logits of the last position.
        let last = &data[(seq_len - 1) * vocab_size..seq_len * vocab_size];
        last.iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx as i64)
            .ok_or_else(|| CaptionError::InvalidOutput("empty logits row".into()))
    }
}
